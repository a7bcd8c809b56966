//! Error types for the protocol crate.

use crate::cursor::CursorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Stable, machine-readable error kinds exposed to clients.
///
/// The string form (`code()`) is part of the public contract and never
/// changes between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed target list or request parameters.
    InvalidRequest,
    /// Authorization removed every requested target.
    NotAuthorized,
    /// Mutation logging is disabled by configuration.
    NoTransactionLogging,
    /// The cursor could not be decoded or belongs to another log.
    InvalidCursor,
    /// The cursor references a region of the log removed by retention.
    CursorExpired,
    /// The master process cannot be reached.
    UpstreamUnavailable,
    /// The master did not answer a forwarded query in time.
    UpstreamTimeout,
    /// Any other failure.
    Unexpected,
}

impl ErrorKind {
    /// Returns the stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::NotAuthorized => "not_authorized",
            ErrorKind::NoTransactionLogging => "no_transaction_logging",
            ErrorKind::InvalidCursor => "invalid_cursor",
            ErrorKind::CursorExpired => "cursor_expired",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::UpstreamTimeout => "upstream_timeout",
            ErrorKind::Unexpected => "unexpected",
        }
    }

    /// Returns the HTTP status code used for this kind.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::InvalidRequest
            | ErrorKind::NoTransactionLogging
            | ErrorKind::InvalidCursor => 400,
            ErrorKind::NotAuthorized => 403,
            ErrorKind::CursorExpired => 410,
            ErrorKind::Unexpected => 500,
            ErrorKind::UpstreamUnavailable => 503,
            ErrorKind::UpstreamTimeout => 504,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Errors raised while parsing or encoding protocol values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// A tree path could not be parsed.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The raw path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An event name outside the known vocabulary.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// The request did not match any accepted shape.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Cursor decoding failed.
    #[error(transparent)]
    Cursor(#[from] CursorError),

    /// Failed to encode a wire message.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// Failed to decode a wire message.
    #[error("decoding failed: {0}")]
    Decoding(String),
}

impl ProtocolError {
    /// Creates an invalid path error.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Returns the client-facing kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::InvalidPath { .. }
            | ProtocolError::UnknownEvent(_)
            | ProtocolError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ProtocolError::Cursor(_) => ErrorKind::InvalidCursor,
            ProtocolError::Encoding(_) | ProtocolError::Decoding(_) => ErrorKind::Unexpected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorKind::InvalidRequest.code(), "invalid_request");
        assert_eq!(ErrorKind::NoTransactionLogging.code(), "no_transaction_logging");
        assert_eq!(ErrorKind::UpstreamTimeout.to_string(), "upstream_timeout");
    }

    #[test]
    fn serde_matches_code() {
        for kind in [
            ErrorKind::InvalidRequest,
            ErrorKind::NotAuthorized,
            ErrorKind::NoTransactionLogging,
            ErrorKind::InvalidCursor,
            ErrorKind::CursorExpired,
            ErrorKind::UpstreamUnavailable,
            ErrorKind::UpstreamTimeout,
            ErrorKind::Unexpected,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.code()));
        }
    }

    #[test]
    fn error_classification() {
        assert_eq!(
            ProtocolError::UnknownEvent("nope".into()).kind(),
            ErrorKind::InvalidRequest
        );
        assert_eq!(
            ProtocolError::Cursor(CursorError::ChecksumMismatch).kind(),
            ErrorKind::InvalidCursor
        );
        assert_eq!(ErrorKind::CursorExpired.http_status(), 410);
    }
}
