//! Error types for the networking module.
//!
//! Two layers exist. [`NetworkError`] describes why a single attempt failed and
//! decides whether another attempt is worthwhile. [`ErrorKind`] is the coarse,
//! stable classification handed to listeners once a logical request has
//! finished failing.

use std::fmt;
use std::path::PathBuf;

use courier_core::CoreError;
use serde::{Deserialize, Serialize};

/// Terminal error classification reported to listeners.
///
/// The integer codes are part of the public contract and never change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The server answered but the body was empty or unreadable.
    EmptyResponse,
    /// The connectivity probe reported no network.
    NoConnection,
    /// The address could not be parsed, or a download got a non-success status.
    UrlInvalid,
    /// Retries were exhausted or the transport failed unrecoverably.
    ServerError,
    /// A local file was missing, too large, or not written.
    LocalFileInvalid,
    /// The response body failed validation. Reserved for listeners.
    ResponseDataInvalid,
}

impl ErrorKind {
    /// The stable integer code for this kind.
    pub const fn code(self) -> i32 {
        match self {
            Self::EmptyResponse => 1,
            Self::NoConnection => 2,
            Self::UrlInvalid => 3,
            Self::ServerError => 4,
            Self::LocalFileInvalid => 10,
            Self::ResponseDataInvalid => 11,
        }
    }

    /// Look up a kind by its integer code.
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::EmptyResponse),
            2 => Some(Self::NoConnection),
            3 => Some(Self::UrlInvalid),
            4 => Some(Self::ServerError),
            10 => Some(Self::LocalFileInvalid),
            11 => Some(Self::ResponseDataInvalid),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EmptyResponse => "empty response",
            Self::NoConnection => "no connection",
            Self::UrlInvalid => "invalid URL",
            Self::ServerError => "server error",
            Self::LocalFileInvalid => "invalid local file",
            Self::ResponseDataInvalid => "invalid response data",
        };
        write!(f, "{name} ({})", self.code())
    }
}

/// Why one attempt of a request failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NetworkError {
    /// The address is not a valid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The request timed out.
    #[error("Request timed out")]
    Timeout,

    /// Connection refused, reset, or otherwise failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// I/O error while reading or writing a stream.
    #[error("I/O error: {0}")]
    Io(String),

    /// The transport failed for another reason.
    #[error("HTTP request error: {0}")]
    Request(String),

    /// A header name or value was rejected.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// A local file could not be used.
    #[error("Local file {}: {reason}", path.display())]
    LocalFile {
        /// The offending path.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// The server answered with a status that rules out reading the body.
    #[error("HTTP {status}")]
    HttpStatus {
        /// The HTTP status code.
        status: u16,
    },

    /// The response body was empty or could not be decoded.
    #[error("Empty or unreadable response body")]
    EmptyResponse,

    /// Worker or event loop plumbing failed.
    #[error("Core error: {0}")]
    Core(String),
}

impl NetworkError {
    /// Create a local file error.
    pub fn local_file(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::LocalFile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether another attempt of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Connection(_) | Self::Io(_) | Self::Request(_)
        )
    }

    /// The kind reported when this failure ends a logical request.
    ///
    /// Retryable failures map to [`ErrorKind::ServerError`], which is what a
    /// listener sees once the retry budget is spent.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUrl(_) | Self::HttpStatus { .. } => ErrorKind::UrlInvalid,
            Self::LocalFile { .. } => ErrorKind::LocalFileInvalid,
            Self::EmptyResponse => ErrorKind::EmptyResponse,
            Self::Timeout
            | Self::Connection(_)
            | Self::Io(_)
            | Self::Request(_)
            | Self::InvalidHeader(_)
            | Self::Core(_) => ErrorKind::ServerError,
        }
    }
}

impl From<CoreError> for NetworkError {
    fn from(err: CoreError) -> Self {
        Self::Core(err.to_string())
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else if err.is_builder() {
            Self::InvalidUrl(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

impl From<url::ParseError> for NetworkError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        match err.kind() {
            Io::TimedOut | Io::WouldBlock => Self::Timeout,
            Io::ConnectionRefused | Io::ConnectionReset | Io::ConnectionAborted => {
                Self::Connection(err.to_string())
            }
            _ => Self::Io(err.to_string()),
        }
    }
}

impl From<http::header::InvalidHeaderName> for NetworkError {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for NetworkError {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

/// A specialized Result type for network operations.
pub type Result<T> = std::result::Result<T, NetworkError>;
