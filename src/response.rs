//! Responses and notifications.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use tokio::io::AsyncBufRead;
use url::Url;

use crate::codec::{self, Limits, NOTIFICATION_URL, VERSION};
use crate::error::{Error, Result};
use crate::header::Header;
use crate::request::Request;
use crate::status::{status_text, STATUS_INTERNAL_SERVER_ERROR, STATUS_NOTIFICATION};

/// A single response message.
///
/// The link back to the originating request is its identifier (and a copy
/// of its URL); a response never owns the request it answers.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Identifier of the answered request, or 0 for a notification.
    pub identifier: u64,
    /// URL of the answered request, or the fixed notification URL.
    pub url: Url,
    pub header: Header,
    pub body: Bytes,
    pub status_code: u16,
    pub status: String,
}

impl Response {
    /// Build a response to `request`, or an unsolicited one when `None`.
    pub fn new(request: Option<&Request>, status_code: u16, body: impl Into<Bytes>) -> Self {
        let (identifier, url) = match request {
            Some(r) => (r.identifier, r.url.clone()),
            None => (0, notification_url()),
        };

        Self {
            identifier,
            url,
            header: Header::new(),
            body: body.into(),
            status_code,
            status: status_text(status_code).to_string(),
        }
    }

    /// Build a response whose body is `value` serialized as JSON. A value
    /// that fails to serialize yields a 500 error response instead.
    pub fn json<T: Serialize>(request: Option<&Request>, status_code: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(request, status_code, body),
            Err(e) => Self::error(request, STATUS_INTERNAL_SERVER_ERROR, e),
        }
    }

    /// Build an error response with body `{"error": "<message>"}`.
    pub fn error(request: Option<&Request>, status_code: u16, message: impl Display) -> Self {
        let body = serde_json::json!({ "error": message.to_string() });
        Self::new(request, status_code, body.to_string())
    }

    /// Unsolicited push: identifier 0, status 105.
    pub fn notification(body: impl Into<Bytes>) -> Self {
        Self::new(None, STATUS_NOTIFICATION, body)
    }

    pub fn is_notification(&self) -> bool {
        self.identifier == 0
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Deserialize the body as JSON.
    pub fn parse_json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    /// The `error` field of a JSON error body, if present.
    pub fn error_message(&self) -> Option<String> {
        let value: serde_json::Value = self.parse_json().ok()?;
        value.get("error")?.as_str().map(str::to_string)
    }

    /// Encode as `P2PJSON/0.1 <code> <text>`, headers, blank line, body.
    pub fn encode(&self) -> Result<Bytes> {
        // the decoder needs a third token even for codes without a reason phrase
        let text = if self.status.is_empty() {
            "Unknown"
        } else {
            self.status.as_str()
        };
        let start = format!("{} {} {}", VERSION, self.status_code, text);
        codec::encode_message(&start, &self.header, self.identifier, &self.body)
    }

    /// Decode one response from `reader`. The URL is not carried on the
    /// wire; it is set to the notification URL until the response is
    /// matched with its request.
    pub async fn read_from<R>(reader: &mut R, limits: &Limits) -> Result<Self>
    where
        R: AsyncBufRead + Unpin,
    {
        let raw = codec::read_message(reader, limits).await?;

        let parts: Vec<&str> = raw.start.split_whitespace().collect();
        if parts.len() < 3 {
            return Err(Error::MalformedMessage(format!(
                "response start line needs version, code and text, got {:?}",
                raw.start
            )));
        }

        let status_code = parts[1].parse::<u16>().map_err(|_| {
            Error::MalformedMessage(format!("invalid status code {:?}", parts[1]))
        })?;

        Ok(Self {
            identifier: raw.identifier,
            url: notification_url(),
            header: raw.header,
            body: raw.body,
            status_code,
            status: parts[2..].join(" "),
        })
    }
}

fn notification_url() -> Url {
    Url::parse(NOTIFICATION_URL).expect("notification url is valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{STATUS_CREATED, STATUS_NOT_FOUND, STATUS_OK};
    use tokio::io::BufReader;

    #[test]
    fn test_new_copies_request_identity() {
        let req = Request::new("p2pjson://core/tag/create", "").unwrap();
        let resp = Response::new(Some(&req), STATUS_CREATED, "{}");
        assert_eq!(resp.identifier, req.identifier);
        assert_eq!(resp.url, req.url);
        assert_eq!(resp.status, "Created");
        assert!(resp.is_success());
    }

    #[test]
    fn test_unsolicited_defaults() {
        let resp = Response::notification(r#"{"event":"indexed"}"#);
        assert_eq!(resp.identifier, 0);
        assert!(resp.is_notification());
        assert_eq!(resp.url.as_str(), NOTIFICATION_URL);
        assert_eq!(resp.status_code, 105);
        assert_eq!(resp.status, "NOTIFICATION");
    }

    #[test]
    fn test_error_body() {
        let resp = Response::error(None, STATUS_NOT_FOUND, "not found");
        assert_eq!(&resp.body[..], br#"{"error":"not found"}"#);
        assert_eq!(resp.error_message().as_deref(), Some("not found"));
        assert!(!resp.is_success());
    }

    #[test]
    fn test_error_body_escapes() {
        let resp = Response::error(None, 500, "bad \"quote\"");
        assert_eq!(resp.error_message().as_deref(), Some("bad \"quote\""));
    }

    #[test]
    fn test_json_body() {
        let resp = Response::json(None, STATUS_OK, &serde_json::json!({"id": 1}));
        let value: serde_json::Value = resp.parse_json().unwrap();
        assert_eq!(value["id"], 1);
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let req = Request::new("p2pjson://core/tag/create", "").unwrap();
        let mut resp = Response::new(Some(&req), STATUS_NOT_FOUND, r#"{"error":"not found"}"#);
        resp.header.set("X-Served-By", "core");

        let encoded = resp.encode().unwrap();
        let mut reader = BufReader::new(&encoded[..]);
        let decoded = Response::read_from(&mut reader, &Limits::default())
            .await
            .unwrap();

        assert_eq!(decoded.identifier, req.identifier);
        assert_eq!(decoded.status_code, 404);
        assert_eq!(decoded.status, "Not Found");
        assert_eq!(decoded.body, resp.body);
        assert_eq!(decoded.header.get("X-Served-By"), Some("core"));
        assert_eq!(decoded.header.get("Content-Length"), Some("21"));
    }

    #[tokio::test]
    async fn test_unknown_code_still_decodes() {
        let resp = Response::new(None, 299, "");
        let encoded = resp.encode().unwrap();
        let mut reader = BufReader::new(&encoded[..]);
        let decoded = Response::read_from(&mut reader, &Limits::default())
            .await
            .unwrap();
        assert_eq!(decoded.status_code, 299);
        assert_eq!(decoded.status, "Unknown");
    }

    #[tokio::test]
    async fn test_decode_short_start_line() {
        let wire = b"P2PJSON/0.1 200\r\nIdentifier: 1\r\nContent-Length: 0\r\n\r\n";
        let mut reader = BufReader::new(&wire[..]);
        let err = Response::read_from(&mut reader, &Limits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedMessage(_)));
    }

    #[tokio::test]
    async fn test_decode_bad_status_code() {
        let wire = b"P2PJSON/0.1 abc OK\r\nIdentifier: 1\r\nContent-Length: 0\r\n\r\n";
        let mut reader = BufReader::new(&wire[..]);
        let err = Response::read_from(&mut reader, &Limits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedMessage(_)));
    }
}
