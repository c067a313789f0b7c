//! Protocol errors.
//!
//! Two families matter to the read loop: framing errors describe a bad
//! frame and are answered over the wire, transport errors mean the stream
//! itself is gone.

use std::fmt;
use std::io;

use crate::status::{STATUS_INTERNAL_SERVER_ERROR, STATUS_PAYLOAD_TOO_LARGE};

#[derive(Debug)]
pub enum Error {
    /// Underlying stream failure.
    Io(io::Error),
    /// Bad start line, overlong or non-UTF-8 line.
    MalformedMessage(String),
    /// Unparsable URL or wrong scheme.
    MalformedRequest {
        message: String,
        identifier: Option<u64>,
    },
    /// Missing or non-integer mandatory header, or a header line without a colon.
    MalformedHeader {
        message: String,
        identifier: Option<u64>,
    },
    /// Declared body exceeds the configured limit. The body has been drained.
    BodyTooLarge {
        length: usize,
        max: usize,
        identifier: Option<u64>,
    },
    /// The peer has stopped; no further frames are read or written.
    Closed,
    /// No response arrived before the caller's deadline.
    Timeout,
}

impl Error {
    /// True for errors caused by a bad frame rather than a broken stream.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            Error::MalformedMessage(_)
                | Error::MalformedRequest { .. }
                | Error::MalformedHeader { .. }
                | Error::BodyTooLarge { .. }
        )
    }

    /// Identifier of the offending frame, when it could be read.
    pub fn identifier(&self) -> Option<u64> {
        match self {
            Error::MalformedRequest { identifier, .. }
            | Error::MalformedHeader { identifier, .. }
            | Error::BodyTooLarge { identifier, .. } => *identifier,
            _ => None,
        }
    }

    /// Status code used when this error is answered over the wire.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::BodyTooLarge { .. } => STATUS_PAYLOAD_TOO_LARGE,
            _ => STATUS_INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn with_identifier(self, id: u64) -> Self {
        match self {
            Error::MalformedRequest { message, .. } => Error::MalformedRequest {
                message,
                identifier: Some(id),
            },
            Error::MalformedHeader { message, .. } => Error::MalformedHeader {
                message,
                identifier: Some(id),
            },
            Error::BodyTooLarge { length, max, .. } => Error::BodyTooLarge {
                length,
                max,
                identifier: Some(id),
            },
            other => other,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "stream error: {}", e),
            Error::MalformedMessage(msg) => write!(f, "malformed message: {}", msg),
            Error::MalformedRequest { message, .. } => write!(f, "malformed request: {}", message),
            Error::MalformedHeader { message, .. } => write!(f, "malformed header: {}", message),
            Error::BodyTooLarge { length, max, .. } => {
                write!(f, "body of {} bytes exceeds limit of {} bytes", length, max)
            }
            Error::Closed => write!(f, "peer closed"),
            Error::Timeout => write!(f, "request timed out"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
