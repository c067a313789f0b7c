//! Echo route, for round-trip and payload-size checks from the parent
//! process. Expects the body to have been parsed by `json_body`.

use p2pjson::{Request, Response, STATUS_INTERNAL_SERVER_ERROR, STATUS_OK};
use serde_json::Value;

use super::BODY_KEY;

pub fn handle(request: Request) -> Response {
    match request.get::<Value>(BODY_KEY) {
        Some(value) => Response::json(Some(&request), STATUS_OK, value),
        None => Response::error(
            Some(&request),
            STATUS_INTERNAL_SERVER_ERROR,
            "request body was not parsed",
        ),
    }
}
