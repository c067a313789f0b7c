use p2pjson::{Request, Response, STATUS_OK};
use serde_json::json;

pub fn handle(request: Request) -> Response {
    Response::json(Some(&request), STATUS_OK, &json!({ "message": "pong" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pong() {
        let req = Request::new("p2pjson://core/ping", "").unwrap();
        let id = req.identifier;
        let resp = handle(req);
        assert_eq!(resp.identifier, id);
        assert_eq!(resp.status_code, STATUS_OK);
        assert_eq!(&resp.body[..], br#"{"message":"pong"}"#);
    }
}
