//! Error types for the sync server.

use crate::log::LogError;
use crate::rules::RuleError;
use thiserror::Error;
use treesync_cluster::IpcError;
use treesync_protocol::{ErrorKind, ProtocolError, RemoteError};

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Message returned to clients in place of internal error details.
pub(crate) const UNEXPECTED_MESSAGE: &str = "an unexpected error occurred";

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Authorization failed.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Mutation logging is disabled.
    #[error("transaction logging is not enabled")]
    NoTransactionLogging,

    /// The cursor is malformed or belongs to another log.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// The cursor points into a truncated part of the log.
    #[error("cursor expired: {0}")]
    CursorExpired(String),

    /// Failure on the master/worker channel.
    #[error(transparent)]
    Upstream(#[from] IpcError),

    /// The mutation log failed.
    #[error("mutation log error: {0}")]
    Log(#[from] LogError),

    /// The rule evaluator failed.
    #[error("rule evaluation error: {0}")]
    Rules(#[from] RuleError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidRequest(message) => ServerError::InvalidRequest(message),
            ProtocolError::Cursor(cursor) => ServerError::InvalidCursor(cursor.to_string()),
            other if other.kind() == ErrorKind::InvalidRequest => {
                ServerError::InvalidRequest(other.to_string())
            }
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl ServerError {
    /// Returns the client-facing kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ServerError::NotAuthorized(_) => ErrorKind::NotAuthorized,
            ServerError::NoTransactionLogging => ErrorKind::NoTransactionLogging,
            ServerError::InvalidCursor(_) => ErrorKind::InvalidCursor,
            ServerError::CursorExpired(_) => ErrorKind::CursorExpired,
            ServerError::Upstream(err) => err.kind(),
            ServerError::Log(LogError::Truncated { .. }) => ErrorKind::CursorExpired,
            ServerError::Log(_)
            | ServerError::Rules(_)
            | ServerError::Config(_)
            | ServerError::Internal(_) => ErrorKind::Unexpected,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.kind().http_status())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.kind().http_status() >= 500
    }

    /// Returns the message that may be shown to clients.
    ///
    /// Unexpected failures are reduced to a generic message; the details
    /// only go to the server log.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Unexpected => UNEXPECTED_MESSAGE.to_string(),
            ErrorKind::UpstreamUnavailable => "master process is unavailable".to_string(),
            ErrorKind::UpstreamTimeout => "master process did not respond in time".to_string(),
            _ => match self {
                ServerError::Upstream(IpcError::Remote(remote)) => remote.message.clone(),
                ServerError::Log(LogError::Truncated { .. }) => {
                    "cursor refers to truncated log entries".to_string()
                }
                other => other.to_string(),
            },
        }
    }

    /// Converts the error into its IPC reply form.
    pub fn to_remote(&self) -> RemoteError {
        RemoteError::new(self.kind(), self.public_message())
    }
}
