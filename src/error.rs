use std::fmt;

use thiserror::Error;

/// Closed classification of upstream failures. The retry controller
/// switches on this, never on the error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Provider signalled throttling (HTTP 429 or an in-body rate-limit marker).
    RateLimited,
    NetworkTimeout,
    ConnectionFailed,
    /// Provider refused the session (HTTP 401/403, e.g. a stale crumb).
    Unauthorized,
    /// Anything else: 5xx, unexpected status, undecodable body.
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::RateLimited => "rate limited",
            ErrorKind::NetworkTimeout => "timeout",
            ErrorKind::ConnectionFailed => "connection failed",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Other => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: ErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other, message)
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        let kind = match status.as_u16() {
            429 => ErrorKind::RateLimited,
            408 | 504 => ErrorKind::NetworkTimeout,
            401 | 403 => ErrorKind::Unauthorized,
            _ => ErrorKind::Other,
        };
        Self::new(kind, format!("{context}: HTTP {status}"))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return FetchError::from_status(status, "request failed");
        }
        let kind = if err.is_timeout() {
            ErrorKind::NetworkTimeout
        } else if err.is_connect() {
            ErrorKind::ConnectionFailed
        } else {
            ErrorKind::Other
        };
        FetchError::new(kind, err.to_string())
    }
}
