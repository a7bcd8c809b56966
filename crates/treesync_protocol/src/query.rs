//! Query and result types shared by the engine and the cluster transport.

use crate::record::MutationRecord;
use crate::target::SubscriptionTarget;
use serde::{Deserialize, Serialize};

/// Where a mutation query starts reading the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryStart {
    /// Resume from a cursor previously issued by the server.
    Cursor(String),
    /// Start at the first record at or after this time (ms since epoch).
    Timestamp(u64),
    /// Start at the oldest retained record.
    Beginning,
}

/// An authorized mutation query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationQuery {
    /// Targets the caller is allowed to read.
    pub targets: Vec<SubscriptionTarget>,
    /// Lower bound of the scan.
    pub start: QueryStart,
}

impl MutationQuery {
    /// Creates a new query.
    pub fn new(targets: Vec<SubscriptionTarget>, start: QueryStart) -> Self {
        Self { targets, start }
    }
}

/// Result of a mutation query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationBatch {
    /// Matching records in ascending log position order.
    pub records: Vec<MutationRecord>,
    /// Cursor to resume from.
    pub cursor: String,
    /// Whether the scan stopped before reaching the log head.
    pub has_more: bool,
}
