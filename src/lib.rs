//! p2pjson: peer-to-peer JSON request/response over one duplex stream.
//!
//! Two processes exchange HTTP-like text frames over a single byte stream,
//! typically a child process's stdin/stdout:
//! - Either side can send requests
//! - Many requests can be outstanding at once
//! - Responses are matched to requests by `Identifier`, in any order
//!
//! ```ignore
//! let mut mux = Mux::new();
//! mux.register("/ping", |r| Response::new(Some(&r), STATUS_OK, r#"{"message":"pong"}"#));
//!
//! let (peer, stdin) = Peer::stdio(Limits::default());
//! peer.listen(stdin, &mux).await;
//! ```

pub mod codec;
pub mod error;
pub mod header;
pub mod id;
pub mod mux;
pub mod peer;
pub mod request;
pub mod response;
pub mod status;
mod writer;

pub use codec::{Limits, MessageType, SCHEME, VERSION};
pub use error::{Error, Result};
pub use header::Header;
pub use mux::{Handler, HandlerFunc, Mux};
pub use peer::{Peer, PeerStats};
pub use request::{Extensions, Request};
pub use response::Response;
pub use status::*;
