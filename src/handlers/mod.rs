//! Built-in routes served by the binary.
//!
//! - `/ping`: liveness check, answers `{"message":"pong"}`
//! - `/echo`: returns the JSON request body unchanged
//!
//! Application routes are registered by embedders on their own `Mux`;
//! these exist so a parent process can verify the pipe end to end.

mod echo;
mod ping;

use p2pjson::{Mux, Request, Response, STATUS_BAD_REQUEST};
use serde_json::Value;

/// Key under which [`json_body`] stores the parsed body.
pub const BODY_KEY: &str = "body";

/// Router with every built-in route registered.
pub fn router() -> Mux {
    let mut mux = Mux::new();
    mux.register("/ping", ping::handle);
    mux.register("/echo", json_body(echo::handle));
    mux
}

/// Parse the body as JSON before `next` runs and attach it to the request
/// under [`BODY_KEY`]. An empty body is treated as `null`; anything that
/// is not JSON is answered with 400 without calling `next`.
pub fn json_body<F>(next: F) -> impl Fn(Request) -> Response + Send + Sync + 'static
where
    F: Fn(Request) -> Response + Send + Sync + 'static,
{
    move |mut request: Request| {
        let value = if request.body.is_empty() {
            Value::Null
        } else {
            match serde_json::from_slice::<Value>(&request.body) {
                Ok(value) => value,
                Err(e) => return Response::error(Some(&request), STATUS_BAD_REQUEST, e),
            }
        };
        request.set(BODY_KEY, value);
        next(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p2pjson::{STATUS_NOT_FOUND, STATUS_OK};

    #[test]
    fn test_router_routes() {
        assert_eq!(router().routes(), vec!["/echo", "/ping"]);
    }

    #[test]
    fn test_json_body_attaches_value() {
        let handler = json_body(|r: Request| {
            let name = r
                .get::<Value>(BODY_KEY)
                .and_then(|v| v["name"].as_str())
                .unwrap_or_default()
                .to_string();
            Response::new(Some(&r), STATUS_OK, name)
        });

        let resp = handler(Request::new("p2pjson://core/x", r#"{"name":"a"}"#).unwrap());
        assert_eq!(&resp.body[..], b"a");
    }

    #[test]
    fn test_json_body_rejects_invalid_json() {
        let handler = json_body(|r: Request| Response::new(Some(&r), STATUS_OK, "unreachable"));
        let req = Request::new("p2pjson://core/x", "{not json").unwrap();
        let id = req.identifier;

        let resp = handler(req);
        assert_eq!(resp.status_code, STATUS_BAD_REQUEST);
        assert_eq!(resp.identifier, id);
        assert!(resp.error_message().is_some());
    }

    #[test]
    fn test_unknown_route() {
        let resp = router().dispatch(Request::new("p2pjson://core/nope", "").unwrap());
        assert_eq!(resp.status_code, STATUS_NOT_FOUND);
        assert_eq!(&resp.body[..], br#"{"error":"not found"}"#);
    }
}
