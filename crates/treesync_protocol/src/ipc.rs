//! Messages exchanged between worker processes and the master.
//!
//! Every message travels as one CBOR-encoded frame. After a successful
//! `Hello`/`Welcome` exchange the worker may have any number of `Query`
//! messages in flight; replies are matched by `request_id` and may arrive in
//! any order.

use crate::error::{ErrorKind, ProtocolError, ProtocolResult};
use crate::query::{MutationBatch, MutationQuery};
use serde::{Deserialize, Serialize};

/// IPC protocol version.
pub const IPC_PROTOCOL_VERSION: u16 = 1;

/// Largest frame either side accepts (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// First message sent by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Worker's protocol version.
    pub protocol_version: u16,
    /// Worker identifier (for logs only).
    pub worker_id: String,
    /// Random challenge the master must sign.
    pub nonce: Vec<u8>,
    /// Worker clock, ms since epoch.
    pub timestamp_ms: u64,
    /// HMAC over the fields above.
    pub mac: Vec<u8>,
}

/// Master's answer to an accepted `Hello`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    /// Master's protocol version.
    pub protocol_version: u16,
    /// HMAC over the worker's nonce.
    pub mac: Vec<u8>,
}

/// An error carried back from the master.
///
/// Messages are already sanitized; they never contain positions,
/// addresses or credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Client-facing kind.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl RemoteError {
    /// Creates a remote error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// An IPC message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IpcMessage {
    /// Worker greeting.
    Hello(Hello),
    /// Handshake accepted.
    Welcome(Welcome),
    /// Handshake refused.
    Rejected {
        /// Why.
        reason: String,
    },
    /// Forwarded query.
    Query {
        /// Correlation id chosen by the worker.
        request_id: u64,
        /// The query.
        query: MutationQuery,
    },
    /// Answer to a query.
    Reply {
        /// Correlation id of the query.
        request_id: u64,
        /// Outcome.
        outcome: Result<MutationBatch, RemoteError>,
    },
    /// The worker no longer needs the answer.
    Cancel {
        /// Correlation id of the query.
        request_id: u64,
    },
}

impl IpcMessage {
    /// Returns a short name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            IpcMessage::Hello(_) => "hello",
            IpcMessage::Welcome(_) => "welcome",
            IpcMessage::Rejected { .. } => "rejected",
            IpcMessage::Query { .. } => "query",
            IpcMessage::Reply { .. } => "reply",
            IpcMessage::Cancel { .. } => "cancel",
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| ProtocolError::Encoding(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decoding(e.to_string()))
    }
}
