//! Error types for the cluster transport.

use thiserror::Error;
use treesync_protocol::{ErrorKind, ProtocolError, RemoteError};

/// Result type for cluster operations.
pub type IpcResult<T> = Result<T, IpcError>;

/// Errors that can occur on the master/worker channel.
#[derive(Error, Debug)]
pub enum IpcError {
    /// Socket error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error (invalid frame or unexpected message).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Handshake authentication failed.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// TLS setup failed.
    #[error("tls error: {0}")]
    Tls(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A frame exceeded the size limit.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// No connection to the master.
    #[error("not connected to master")]
    NotConnected,

    /// The connection dropped while a query was in flight.
    #[error("connection to master lost")]
    ConnectionLost,

    /// The master did not answer in time.
    #[error("operation timed out")]
    Timeout,

    /// The master answered with an error.
    #[error("remote error ({}): {}", .0.kind, .0.message)]
    Remote(RemoteError),
}

impl From<ProtocolError> for IpcError {
    fn from(err: ProtocolError) -> Self {
        IpcError::Protocol(err.to_string())
    }
}

impl IpcError {
    /// Returns true if reconnecting may fix this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IpcError::Io(_)
                | IpcError::NotConnected
                | IpcError::ConnectionLost
                | IpcError::Timeout
        )
    }

    /// Returns the client-facing kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IpcError::Timeout => ErrorKind::UpstreamTimeout,
            IpcError::Remote(remote) => remote.kind,
            IpcError::Protocol(_) | IpcError::Config(_) | IpcError::FrameTooLarge(_) => {
                ErrorKind::Unexpected
            }
            IpcError::Io(_)
            | IpcError::Authentication(_)
            | IpcError::Tls(_)
            | IpcError::NotConnected
            | IpcError::ConnectionLost => ErrorKind::UpstreamUnavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(IpcError::NotConnected.is_retryable());
        assert!(IpcError::Timeout.is_retryable());
        assert!(!IpcError::Authentication("bad token".into()).is_retryable());
        assert!(!IpcError::Remote(RemoteError::new(ErrorKind::CursorExpired, "x")).is_retryable());
    }

    #[test]
    fn kinds() {
        assert_eq!(IpcError::NotConnected.kind(), ErrorKind::UpstreamUnavailable);
        assert_eq!(IpcError::ConnectionLost.kind(), ErrorKind::UpstreamUnavailable);
        assert_eq!(IpcError::Timeout.kind(), ErrorKind::UpstreamTimeout);
        assert_eq!(
            IpcError::Remote(RemoteError::new(ErrorKind::InvalidCursor, "bad")).kind(),
            ErrorKind::InvalidCursor
        );
    }

    #[test]
    fn error_display() {
        assert_eq!(IpcError::NotConnected.to_string(), "not connected to master");
        let err = IpcError::Remote(RemoteError::new(ErrorKind::CursorExpired, "gone"));
        assert!(err.to_string().contains("cursor_expired"));
    }
}
