//! Outbound and decoded requests.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use tokio::io::AsyncBufRead;
use url::Url;

use crate::codec::{self, Limits, SCHEME, VERSION};
use crate::error::{Error, Result};
use crate::header::Header;
use crate::id::next_id;

/// A single request message.
#[derive(Debug)]
pub struct Request {
    /// Correlation number copied into the answering response.
    pub identifier: u64,
    /// `p2pjson://<host>/<path>[?query]`; the path selects the handler.
    pub url: Url,
    pub header: Header,
    pub body: Bytes,
    /// Request-scoped values attached while the request moves through
    /// middleware and handlers. Never sent on the wire.
    pub extensions: Extensions,
}

impl Request {
    /// Build an outbound request with the next process-wide identifier.
    pub fn new(url: &str, body: impl Into<Bytes>) -> Result<Self> {
        let url = parse_url(url).map_err(|message| Error::MalformedRequest {
            message,
            identifier: None,
        })?;

        Ok(Self {
            identifier: next_id(),
            url,
            header: Header::new(),
            body: body.into(),
            extensions: Extensions::default(),
        })
    }

    /// Build a request whose body is `value` serialized as JSON.
    pub fn json<T: serde::Serialize>(url: &str, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value).map_err(|e| Error::MalformedRequest {
            message: e.to_string(),
            identifier: None,
        })?;
        Self::new(url, body)
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// First value of a query parameter.
    pub fn query(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Deserialize the body as JSON.
    pub fn parse_json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    /// Attach a request-scoped value.
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.extensions.insert(key, value);
    }

    /// Fetch a request-scoped value of type `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.extensions.get(key)
    }

    /// Encode as `<url> P2PJSON/0.1`, headers, blank line, body.
    pub fn encode(&self) -> Result<Bytes> {
        let start = format!("{} {}", self.url, VERSION);
        codec::encode_message(&start, &self.header, self.identifier, &self.body)
    }

    /// Decode one request from `reader`, leaving the stream positioned at
    /// the first byte after the body.
    pub async fn read_from<R>(reader: &mut R, limits: &Limits) -> Result<Self>
    where
        R: AsyncBufRead + Unpin,
    {
        let raw = codec::read_message(reader, limits).await?;

        let parts: Vec<&str> = raw.start.split_whitespace().collect();
        if parts.len() < 2 {
            return Err(Error::MalformedMessage(format!(
                "request start line needs url and version, got {:?}",
                raw.start
            )));
        }

        let url = parse_url(parts[0]).map_err(|message| Error::MalformedRequest {
            message,
            identifier: Some(raw.identifier),
        })?;

        Ok(Self {
            identifier: raw.identifier,
            url,
            header: raw.header,
            body: raw.body,
            extensions: Extensions::default(),
        })
    }
}

fn parse_url(raw: &str) -> std::result::Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid url {:?}: {}", raw, e))?;
    if url.scheme() != SCHEME {
        return Err(format!(
            "invalid url scheme {:?} (should use '{}')",
            url.scheme(),
            SCHEME
        ));
    }
    Ok(url)
}

/// Typed side table keyed by name.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.map.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.map.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Remove and return the value when it has type `T`. A value of a
    /// different type is left in place.
    pub fn remove<T: Any + Send + Sync>(&mut self, key: &str) -> Option<T> {
        if !self.map.get(key).is_some_and(|v| v.is::<T>()) {
            return None;
        }
        self.map
            .remove(key)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.map.keys().collect();
        keys.sort();
        f.debug_struct("Extensions").field("keys", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, BufReader};

    #[test]
    fn test_new_assigns_increasing_identifiers() {
        let a = Request::new("p2pjson://core/tag/list", "").unwrap();
        let b = Request::new("p2pjson://core/tag/list", "").unwrap();
        assert!(a.identifier > 0);
        assert!(b.identifier > a.identifier);
        assert_eq!(a.path(), "/tag/list");
    }

    #[test]
    fn test_new_rejects_other_schemes() {
        let err = Request::new("http://core/tag/list", "").unwrap_err();
        assert!(matches!(err, Error::MalformedRequest { .. }));
        assert!(Request::new("not a url", "").is_err());
    }

    #[test]
    fn test_query() {
        let req = Request::new("p2pjson://core/tag/list?page=2&per_page=10", "").unwrap();
        assert_eq!(req.query("page").as_deref(), Some("2"));
        assert_eq!(req.query("per_page").as_deref(), Some("10"));
        assert_eq!(req.query("missing"), None);
    }

    #[test]
    fn test_extensions() {
        let mut req = Request::new("p2pjson://core/echo", "").unwrap();
        req.set("body", vec![1u8, 2, 3]);
        assert_eq!(req.get::<Vec<u8>>("body"), Some(&vec![1u8, 2, 3]));
        assert_eq!(req.get::<String>("body"), None);
        assert_eq!(req.extensions.remove::<String>("body"), None);
        assert!(req.extensions.contains("body"));
        assert_eq!(req.extensions.remove::<Vec<u8>>("body"), Some(vec![1, 2, 3]));
        assert!(req.extensions.is_empty());
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let mut req = Request::new("p2pjson://core/tag/create?dry=1", r#"{"name":"a"}"#).unwrap();
        req.header.set("X-Client", "ui");
        req.header.add("Accept", "json");
        req.header.add("Accept", "text");

        let encoded = req.encode().unwrap();
        let mut reader = BufReader::new(&encoded[..]);
        let decoded = Request::read_from(&mut reader, &Limits::default())
            .await
            .unwrap();

        assert_eq!(decoded.identifier, req.identifier);
        assert_eq!(decoded.url, req.url);
        assert_eq!(&decoded.body[..], br#"{"name":"a"}"#);
        assert_eq!(decoded.header.get("X-Client"), Some("ui"));
        assert_eq!(
            decoded.header.get_all("Accept"),
            &["json".to_string(), "text".to_string()]
        );
        assert_eq!(
            decoded.header.get("Identifier"),
            Some(req.identifier.to_string().as_str())
        );
        assert_eq!(decoded.header.get("Content-Length"), Some("12"));
    }

    #[tokio::test]
    async fn test_roundtrip_empty_body() {
        let req = Request::new("p2pjson://core/ping", Bytes::new()).unwrap();
        let encoded = req.encode().unwrap();
        let mut reader = BufReader::new(&encoded[..]);
        let decoded = Request::read_from(&mut reader, &Limits::default())
            .await
            .unwrap();
        assert!(decoded.body.is_empty());
        assert_eq!(decoded.header.get("Content-Length"), Some("0"));
    }

    #[tokio::test]
    async fn test_back_to_back_requests() {
        let first = Request::new("p2pjson://core/a", "one").unwrap();
        let second = Request::new("p2pjson://core/b", "second").unwrap();
        let mut wire = first.encode().unwrap().to_vec();
        wire.extend_from_slice(&second.encode().unwrap());

        let mut reader = BufReader::new(&wire[..]);
        let a = Request::read_from(&mut reader, &Limits::default()).await.unwrap();
        let b = Request::read_from(&mut reader, &Limits::default()).await.unwrap();
        assert_eq!(&a.body[..], b"one");
        assert_eq!(b.path(), "/b");
        assert_eq!(&b.body[..], b"second");

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_decode_short_start_line() {
        let wire = b"p2pjson://core/a\r\nIdentifier: 1\r\nContent-Length: 0\r\n\r\n";
        let mut reader = BufReader::new(&wire[..]);
        let err = Request::read_from(&mut reader, &Limits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedMessage(_)));
    }

    #[tokio::test]
    async fn test_decode_wrong_scheme() {
        let wire = b"http://core/a P2PJSON/0.1\r\nIdentifier: 6\r\nContent-Length: 0\r\n\r\n";
        let mut reader = BufReader::new(&wire[..]);
        let err = Request::read_from(&mut reader, &Limits::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedRequest {
                identifier: Some(6),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_decode_case_insensitive_headers() {
        let wire = b"p2pjson://core/a P2PJSON/0.1\r\nidentifier: 3\r\ncontent-length: 2\r\n\r\nhi";
        let mut reader = BufReader::new(&wire[..]);
        let req = Request::read_from(&mut reader, &Limits::default())
            .await
            .unwrap();
        assert_eq!(req.identifier, 3);
        assert_eq!(&req.body[..], b"hi");
    }
}
