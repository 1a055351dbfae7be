//! Classification of reqwest transport failures.
//!
//! The embedding adapters only distinguish three transport outcomes:
//! the backend could not be reached, the request ran out of time, or
//! the response body could not be decoded. Anything else reqwest can
//! report is grouped under `Other` and treated as a network fault.

use std::error::Error as StdError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    ConnectFailed,
    TimedOut,
    DecodingFailed,
    Other,
}

impl ErrorKind {
    fn classify(err: &reqwest::Error) -> ErrorKind {
        if err.is_timeout() {
            ErrorKind::TimedOut
        } else if err.is_decode() {
            ErrorKind::DecodingFailed
        } else if err.is_connect() {
            ErrorKind::ConnectFailed
        } else {
            ErrorKind::Other
        }
    }
}

/// A reqwest failure tagged with the transport outcome it represents.
#[derive(Debug)]
pub(crate) struct Error {
    kind: ErrorKind,
    source: reqwest::Error,
}

impl From<reqwest::Error> for Error {
    fn from(source: reqwest::Error) -> Error {
        Error {
            kind: ErrorKind::classify(&source),
            source,
        }
    }
}

impl Error {
    pub(crate) fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::ConnectFailed => write!(f, "could not connect to the backend"),
            ErrorKind::TimedOut => write!(f, "the request timed out in transit"),
            ErrorKind::DecodingFailed => write!(f, "the response body could not be decoded"),
            ErrorKind::Other => write!(f, "the request failed: {}", self.source),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.source)
    }
}
