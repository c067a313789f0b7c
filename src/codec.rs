//! Frame reading and writing shared by requests and responses.
//!
//! A frame on the wire is a message-type marker line followed by a
//! message:
//!
//! ```text
//! REQUEST\r\n
//! p2pjson://host/path P2PJSON/0.1\r\n
//! Content-Length: 12\r\n
//! Identifier: 1\r\n
//! \r\n
//! {"name":"a"}
//! ```
//!
//! Responses use `RESPONSE` and a `P2PJSON/0.1 <code> <text>` start line.
//! `EXIT` has no message. The body is always read with a bounded read of
//! exactly `Content-Length` bytes because the next frame follows it
//! directly on the same stream.

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::header::{Header, CONTENT_LENGTH, IDENTIFIER};
use crate::writer::Writer;

pub const VERSION: &str = "P2PJSON/0.1";
pub const SCHEME: &str = "p2pjson";
pub const NOTIFICATION_URL: &str = "p2pjson://response.default/notification";

/// Default cap on a start, header or marker line, excluding the terminator.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024; // 1MB

/// Default cap on a single message body.
pub const DEFAULT_MAX_BODY_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// Marker line preceding every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Response,
    Exit,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Request => "REQUEST",
            MessageType::Response => "RESPONSE",
            MessageType::Exit => "EXIT",
        }
    }

    /// Match a marker line exactly. Unknown markers return `None`.
    pub fn from_marker(line: &str) -> Option<Self> {
        match line {
            "REQUEST" => Some(MessageType::Request),
            "RESPONSE" => Some(MessageType::Response),
            "EXIT" => Some(MessageType::Exit),
            _ => None,
        }
    }

    /// The marker line including its terminator.
    pub fn marker(&self) -> String {
        format!("{}\r\n", self.as_str())
    }
}

/// Decoder limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_body_size: usize,
    pub max_line_length: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

/// A decoded message before start-line interpretation.
#[derive(Debug)]
pub(crate) struct RawMessage {
    pub start: String,
    pub header: Header,
    pub identifier: u64,
    pub body: Bytes,
}

/// Read one line terminated by `\n` (an optional preceding `\r` is
/// stripped). Returns `None` on a clean end of stream.
///
/// An over-long or non-UTF-8 line is consumed up to its terminator before
/// the error is returned, so the next read starts on the following line.
pub(crate) async fn read_line<R>(reader: &mut R, max_line: usize) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    match next_line(reader, max_line).await? {
        Some(Ok(line)) => Ok(Some(line)),
        Some(Err(message)) => Err(Error::MalformedMessage(message)),
        None => Ok(None),
    }
}

/// Outer error: transport failure. Inner error: the line was consumed but
/// is unusable.
async fn next_line<R>(
    reader: &mut R,
    max_line: usize,
) -> Result<Option<std::result::Result<String, String>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let limit = max_line as u64 + 2;
    let n = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }

    if buf.last() != Some(&b'\n') {
        if (n as u64) < limit {
            return Err(unterminated_line());
        }
        skip_line(reader).await?;
        return Ok(Some(Err(format!("line exceeds {} bytes", max_line))));
    }

    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }

    Ok(Some(
        String::from_utf8(buf).map_err(|_| "line is not valid UTF-8".to_string()),
    ))
}

/// Discard input through the next `\n`.
async fn skip_line<R>(reader: &mut R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (done, used) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Err(unterminated_line());
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(i) => (true, i + 1),
                None => (false, available.len()),
            }
        };
        reader.consume(used);
        if done {
            return Ok(());
        }
    }
}

fn unterminated_line() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "stream ended mid-line",
    ))
}

fn unexpected_eof() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "stream ended mid-frame",
    ))
}

/// Read a start line, the header block and the body.
///
/// Whenever `Content-Length` is readable the body is consumed, even if
/// some other part of the message is invalid, so the stream stays aligned
/// on the next frame.
pub(crate) async fn read_message<R>(reader: &mut R, limits: &Limits) -> Result<RawMessage>
where
    R: AsyncBufRead + Unpin,
{
    let max_line = limits.max_line_length;
    let mut bad_line = None;

    let start = match next_line(reader, max_line).await?.ok_or_else(unexpected_eof)? {
        Ok(start) => start,
        Err(message) => {
            bad_line = Some(Error::MalformedMessage(message));
            String::new()
        }
    };

    let mut header = Header::new();
    loop {
        let line = match next_line(reader, max_line).await?.ok_or_else(unexpected_eof)? {
            Ok(line) => line,
            Err(message) => {
                bad_line.get_or_insert(Error::MalformedHeader {
                    message,
                    identifier: None,
                });
                continue;
            }
        };
        if line.is_empty() {
            break;
        }

        match line.split_once(':') {
            Some((name, value)) => {
                let mut values = value
                    .split(|c: char| c.is_ascii_whitespace())
                    .filter(|v| !v.is_empty())
                    .peekable();
                if values.peek().is_none() {
                    header.add(name.trim(), "");
                }
                for v in values {
                    header.add(name.trim(), v);
                }
            }
            None => {
                bad_line.get_or_insert_with(|| Error::MalformedHeader {
                    message: format!("missing ':' in header line {:?}", line),
                    identifier: None,
                });
            }
        }
    }

    let identifier = header_uint(&header, IDENTIFIER);
    let length = header_uint(&header, CONTENT_LENGTH);

    let body = match &length {
        Ok(length) => match read_body(reader, *length, limits).await {
            Err(Error::Io(e)) => return Err(Error::Io(e)),
            other => other,
        },
        Err(_) => Ok(Bytes::new()),
    };

    let known_id = identifier.as_ref().ok().copied();
    let tag = move |err: Error| match known_id {
        Some(id) => err.with_identifier(id),
        None => err,
    };

    if let Some(e) = bad_line {
        return Err(tag(e));
    }
    let identifier = identifier?;
    length.map_err(tag)?;
    let body = body.map_err(tag)?;

    Ok(RawMessage {
        start,
        header,
        identifier,
        body,
    })
}

async fn read_body<R>(reader: &mut R, length: u64, limits: &Limits) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    if length > limits.max_body_size as u64 {
        let drained = tokio::io::copy(&mut (&mut *reader).take(length), &mut tokio::io::sink()).await?;
        if drained < length {
            return Err(unexpected_eof());
        }
        return Err(Error::BodyTooLarge {
            length: usize::try_from(length).unwrap_or(usize::MAX),
            max: limits.max_body_size,
            identifier: None,
        });
    }

    let mut body = BytesMut::zeroed(length as usize);
    reader.read_exact(&mut body).await?;
    Ok(body.freeze())
}

/// Parse a mandatory unsigned integer header.
pub(crate) fn header_uint(header: &Header, name: &str) -> Result<u64> {
    let raw = header.get(name).ok_or_else(|| Error::MalformedHeader {
        message: format!("missing {} header", name),
        identifier: None,
    })?;

    raw.parse::<u64>().map_err(|_| Error::MalformedHeader {
        message: format!("expected integer value for {}, got {:?}", name, raw),
        identifier: None,
    })
}

/// Encode a message: start line, headers (with `Identifier` and
/// `Content-Length` set from the arguments), blank line, body.
pub(crate) fn encode_message(
    start_line: &str,
    header: &Header,
    identifier: u64,
    body: &[u8],
) -> Result<Bytes> {
    let mut header = header.clone();
    header.set(IDENTIFIER, identifier.to_string());
    header.set(CONTENT_LENGTH, body.len().to_string());

    let mut w = Writer::new(BytesMut::with_capacity(128 + body.len()).writer());
    w.write_str(start_line);
    w.write_str("\r\n");
    for (name, values) in header.iter() {
        w.write_str(name);
        w.write_str(": ");
        w.write_str(&values.join(" "));
        w.write_str("\r\n");
    }
    w.write_str("\r\n");
    w.write(body);

    let (out, _) = w.finish()?;
    Ok(out.into_inner().freeze())
}
