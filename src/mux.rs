//! Path-based request routing.

use std::collections::HashMap;
use tracing::trace;

use crate::request::Request;
use crate::response::Response;
use crate::status::STATUS_NOT_FOUND;

/// Anything that can answer a request. Returning `None` sends nothing back.
///
/// Handlers run inline on the peer's read loop: while one is running no
/// further frames are read from that peer.
pub trait Handler: Send + Sync {
    fn serve(&self, request: Request) -> Option<Response>;
}

impl<F> Handler for F
where
    F: Fn(Request) -> Option<Response> + Send + Sync,
{
    fn serve(&self, request: Request) -> Option<Response> {
        self(request)
    }
}

/// A route handler. Always produces a response.
pub type HandlerFunc = Box<dyn Fn(Request) -> Response + Send + Sync>;

/// Exact-match path router.
#[derive(Default)]
pub struct Mux {
    handlers: HashMap<String, HandlerFunc>,
}

impl Mux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` at `path`, replacing any previous handler there.
    pub fn register<F>(&mut self, path: impl Into<String>, handler: F)
    where
        F: Fn(Request) -> Response + Send + Sync + 'static,
    {
        self.handlers.insert(path.into(), Box::new(handler));
    }

    /// Route `request` by its URL path. Unknown paths get a 404 with a
    /// JSON error body; handler responses pass through unchanged.
    pub fn dispatch(&self, request: Request) -> Response {
        match self.handlers.get(request.path()) {
            Some(handler) => {
                trace!(path = request.path(), identifier = request.identifier, "Routing request");
                handler(request)
            }
            None => {
                trace!(path = request.path(), "No handler registered");
                Response::error(Some(&request), STATUS_NOT_FOUND, "not found")
            }
        }
    }

    /// Registered paths, sorted.
    pub fn routes(&self) -> Vec<&str> {
        let mut routes: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        routes.sort_unstable();
        routes
    }
}

impl Handler for Mux {
    fn serve(&self, request: Request) -> Option<Response> {
        Some(self.dispatch(request))
    }
}
