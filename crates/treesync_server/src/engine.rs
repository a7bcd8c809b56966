//! Mutation query engine.
//!
//! Resolves a start position, scans the log and returns the records that
//! match at least one target, together with a cursor to resume from.
//!
//! ## Guarantees
//!
//! - Records are returned in ascending log position, each at most once
//! - The returned cursor is never below the resolved start
//! - A cursor into the truncated part of the log fails with `cursor_expired`

use crate::error::{ServerError, ServerResult};
use crate::log::{LogError, MutationLog};
use std::sync::Arc;
use tracing::{debug, error};
use treesync_cluster::QueryHandler;
use treesync_protocol::{
    CursorCodec, CursorPosition, Delivery, MutationBatch, MutationQuery, MutationRecord,
    QueryStart, RemoteError, SubscriptionTarget,
};

/// Timestamp and beginning starts re-resolve at most this many times when
/// retention races the scan.
const MAX_RESOLVE_ATTEMPTS: usize = 3;

/// Executes mutation queries against the authoritative log.
#[derive(Clone)]
pub struct MutationQueryEngine {
    log: Arc<dyn MutationLog>,
    max_scan: usize,
}

impl MutationQueryEngine {
    /// Creates an engine scanning at most `max_scan` records per query.
    pub fn new(log: Arc<dyn MutationLog>, max_scan: usize) -> Self {
        Self {
            log,
            max_scan: max_scan.max(1),
        }
    }

    /// Returns the log this engine reads.
    pub fn log(&self) -> &Arc<dyn MutationLog> {
        &self.log
    }

    /// Runs a query.
    pub fn query(&self, query: &MutationQuery) -> ServerResult<MutationBatch> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let start = self.resolve_start(&query.start)?;
            match self.log.read_from(start, self.max_scan) {
                Ok(scanned) => return Ok(self.collect(&query.targets, start, scanned)),
                Err(LogError::Truncated { .. }) if !matches!(query.start, QueryStart::Cursor(_)) => {
                    if attempts >= MAX_RESOLVE_ATTEMPTS {
                        return Err(ServerError::Internal(
                            "log retention kept overtaking the scan".into(),
                        ));
                    }
                    debug!(start, "retention raced the scan, resolving again");
                }
                Err(LogError::Truncated { .. }) => {
                    return Err(ServerError::CursorExpired(
                        "cursor refers to truncated log entries".into(),
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Turns a query start into a log position.
    fn resolve_start(&self, start: &QueryStart) -> ServerResult<u64> {
        match start {
            QueryStart::Beginning => Ok(self.log.retention_floor()),
            QueryStart::Timestamp(ms) => Ok(self
                .log
                .position_for_timestamp(*ms)?
                .max(self.log.retention_floor())),
            QueryStart::Cursor(token) => {
                let cursor = CursorCodec::decode(token)
                    .map_err(|e| ServerError::InvalidCursor(e.to_string()))?;
                if cursor.log_id != self.log.log_id() {
                    return Err(ServerError::InvalidCursor(
                        "cursor was issued by another log".into(),
                    ));
                }
                if cursor.position > self.log.head() {
                    return Err(ServerError::InvalidCursor(
                        "cursor is ahead of the log".into(),
                    ));
                }
                if cursor.position < self.log.retention_floor() {
                    return Err(ServerError::CursorExpired(
                        "cursor refers to truncated log entries".into(),
                    ));
                }
                Ok(cursor.position)
            }
        }
    }

    fn collect(
        &self,
        targets: &[SubscriptionTarget],
        start: u64,
        scanned: Vec<MutationRecord>,
    ) -> MutationBatch {
        let next = scanned.last().map(|r| r.position + 1).unwrap_or(start);
        let has_more = scanned.len() >= self.max_scan && next < self.log.head();

        let records = scanned
            .into_iter()
            .filter_map(|record| match delivery(targets, &record)? {
                Delivery::Full => Some(record),
                Delivery::Silent => Some(record.to_silent()),
            })
            .collect::<Vec<_>>();

        let cursor = CursorPosition::new(self.log.log_id(), next, self.log.truncation_epoch())
            .partial(has_more);
        debug!(
            start,
            next,
            matched = records.len(),
            has_more,
            "mutation query complete"
        );

        MutationBatch {
            records,
            cursor: CursorCodec::encode(&cursor),
            has_more,
        }
    }
}

/// Combines the deliveries of all targets; any full delivery wins.
fn delivery(targets: &[SubscriptionTarget], record: &MutationRecord) -> Option<Delivery> {
    let mut result = None;
    for target in targets {
        match target.delivery(record) {
            Some(Delivery::Full) => return Some(Delivery::Full),
            Some(Delivery::Silent) => result = Some(Delivery::Silent),
            None => {}
        }
    }
    result
}

impl QueryHandler for MutationQueryEngine {
    fn handle(&self, query: MutationQuery) -> Result<MutationBatch, RemoteError> {
        self.query(&query).map_err(|e| {
            if e.is_server_error() {
                error!(error = %e, "forwarded query failed");
            }
            e.to_remote()
        })
    }
}

impl std::fmt::Debug for MutationQueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationQueryEngine")
            .field("log_id", &self.log.log_id())
            .field("max_scan", &self.max_scan)
            .finish()
    }
}
