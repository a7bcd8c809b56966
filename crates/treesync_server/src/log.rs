//! Mutation log collaborator and an in-memory implementation.

use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::VecDeque;
use std::io::BufRead;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};
use treesync_protocol::{EventName, MutationRecord, TreePath};

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors reported by a mutation log.
#[derive(Error, Debug)]
pub enum LogError {
    /// The requested position was removed by retention.
    #[error("position {requested} is below the retention floor {floor}")]
    Truncated {
        /// Requested position.
        requested: u64,
        /// First retained position.
        floor: u64,
    },

    /// The log could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be decoded.
    #[error("corrupt log entry at line {line}: {message}")]
    Corrupt {
        /// 1-based line of the offending entry.
        line: usize,
        /// Decoder message.
        message: String,
    },
}

/// Read access to the authoritative mutation log.
///
/// Positions are strictly increasing and assigned by the log owner. The
/// log keeps the half-open range `[retention_floor, head)`.
pub trait MutationLog: Send + Sync {
    /// Returns up to `limit` records with position `>= position`, in order.
    ///
    /// Fails with [`LogError::Truncated`] if `position` is below the
    /// retention floor at the time of the read.
    fn read_from(&self, position: u64, limit: usize) -> LogResult<Vec<MutationRecord>>;

    /// Returns the position of the first retained record with a timestamp
    /// `>= timestamp_ms`, or the head if there is none.
    fn position_for_timestamp(&self, timestamp_ms: u64) -> LogResult<u64>;

    /// Returns the first retained position.
    fn retention_floor(&self) -> u64;

    /// Returns the position the next record will get.
    fn head(&self) -> u64;

    /// Returns a counter that increases on every truncation.
    fn truncation_epoch(&self) -> u64;

    /// Returns the identity of this log.
    fn log_id(&self) -> u64;
}

#[derive(Debug)]
struct LogState {
    records: VecDeque<MutationRecord>,
    floor: u64,
    next_position: u64,
    epoch: u64,
    last_timestamp: u64,
}

impl LogState {
    fn truncate_to(&mut self, floor: u64) -> usize {
        let floor = floor.min(self.next_position);
        if floor <= self.floor {
            return 0;
        }
        let removed = ((floor - self.floor) as usize).min(self.records.len());
        self.records.drain(..removed);
        self.floor = floor;
        self.epoch += 1;
        removed
    }
}

/// In-memory mutation log.
///
/// Backs the standalone and master roles when no storage engine is attached,
/// and is used throughout the tests.
#[derive(Debug)]
pub struct MemoryMutationLog {
    log_id: u64,
    state: RwLock<LogState>,
}

impl MemoryMutationLog {
    /// Creates an empty log with a random id.
    pub fn new() -> Self {
        Self::with_id(rand::random())
    }

    /// Creates an empty log with a fixed id.
    ///
    /// Cursors stay valid across restarts only if the id is stable.
    pub fn with_id(log_id: u64) -> Self {
        Self {
            log_id,
            state: RwLock::new(LogState {
                records: VecDeque::new(),
                floor: 1,
                next_position: 1,
                epoch: 0,
                last_timestamp: 0,
            }),
        }
    }

    /// Appends a record and returns its position.
    ///
    /// The stored timestamp never goes backwards, so timestamp lookups stay
    /// a binary search.
    pub fn append(&self, mut record: MutationRecord) -> u64 {
        let mut state = self.state.write();
        let position = state.next_position;
        record.position = position;
        record.silent = false;
        record.timestamp = record.timestamp.max(state.last_timestamp);
        state.last_timestamp = record.timestamp;
        state.next_position += 1;
        state.records.push_back(record);
        position
    }

    /// Appends a mutation stamped with the current time.
    pub fn record(&self, path: TreePath, event: EventName, value: serde_json::Value) -> u64 {
        self.append(MutationRecord::new(path, event, value, now_millis()))
    }

    /// Removes every record below `position`.
    ///
    /// Returns the number of removed records.
    pub fn truncate_before(&self, position: u64) -> usize {
        let removed = self.state.write().truncate_to(position);
        if removed > 0 {
            debug!(log_id = self.log_id, removed, "truncated mutation log");
        }
        removed
    }

    /// Removes records older than `max_age` relative to `now_ms`.
    pub fn truncate_older_than(&self, max_age: Duration, now_ms: u64) -> usize {
        let cutoff = now_ms.saturating_sub(max_age.as_millis() as u64);
        let mut state = self.state.write();
        let keep_from = state.records.partition_point(|r| r.timestamp < cutoff);
        let floor = match state.records.get(keep_from) {
            Some(record) => record.position,
            None => state.next_position,
        };
        let removed = state.truncate_to(floor);
        drop(state);

        if removed > 0 {
            info!(log_id = self.log_id, removed, "applied mutation log retention");
        }
        removed
    }

    /// Returns the number of retained records.
    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    /// Returns true if no records are retained.
    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }

    /// Appends records from JSON lines.
    ///
    /// Each non-empty line is `{"path", "event", "value"?, "context"?, "timestamp"}`.
    /// Positions are assigned on load.
    pub fn load_jsonl(&self, reader: impl BufRead) -> LogResult<usize> {
        let mut loaded = 0;
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let seed: SeedRecord = serde_json::from_str(&line).map_err(|e| LogError::Corrupt {
                line: index + 1,
                message: e.to_string(),
            })?;
            self.append(
                MutationRecord::new(seed.path, seed.event, seed.value, seed.timestamp)
                    .with_context(seed.context),
            );
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Appends records from a JSON lines file.
    pub fn load_jsonl_file(&self, path: &Path) -> LogResult<usize> {
        let file = std::fs::File::open(path)?;
        self.load_jsonl(std::io::BufReader::new(file))
    }
}

impl Default for MemoryMutationLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MutationLog for MemoryMutationLog {
    fn read_from(&self, position: u64, limit: usize) -> LogResult<Vec<MutationRecord>> {
        let state = self.state.read();
        if position < state.floor {
            return Err(LogError::Truncated {
                requested: position,
                floor: state.floor,
            });
        }
        let skip = (position - state.floor) as usize;
        Ok(state
            .records
            .iter()
            .skip(skip)
            .take(limit)
            .cloned()
            .collect())
    }

    fn position_for_timestamp(&self, timestamp_ms: u64) -> LogResult<u64> {
        let state = self.state.read();
        let index = state.records.partition_point(|r| r.timestamp < timestamp_ms);
        Ok(state
            .records
            .get(index)
            .map(|r| r.position)
            .unwrap_or(state.next_position))
    }

    fn retention_floor(&self) -> u64 {
        self.state.read().floor
    }

    fn head(&self) -> u64 {
        self.state.read().next_position
    }

    fn truncation_epoch(&self) -> u64 {
        self.state.read().epoch
    }

    fn log_id(&self) -> u64 {
        self.log_id
    }
}

#[derive(Deserialize)]
struct SeedRecord {
    path: TreePath,
    event: EventName,
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    context: serde_json::Value,
    timestamp: u64,
}

/// Current wall-clock time in Unix milliseconds, the unit of record timestamps.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn record(path: &str, timestamp: u64) -> MutationRecord {
        MutationRecord::new(
            TreePath::parse(path).unwrap(),
            EventName::Value,
            json!(timestamp),
            timestamp,
        )
    }

    fn log_with(timestamps: &[u64]) -> MemoryMutationLog {
        let log = MemoryMutationLog::with_id(7);
        for ts in timestamps {
            log.append(record("/a", *ts));
        }
        log
    }

    #[test]
    fn empty_log() {
        let log = MemoryMutationLog::with_id(1);
        assert_eq!(log.retention_floor(), 1);
        assert_eq!(log.head(), 1);
        assert!(log.is_empty());
        assert!(log.read_from(1, 10).unwrap().is_empty());
        assert_eq!(log.position_for_timestamp(0).unwrap(), 1);
    }

    #[test]
    fn positions_are_assigned_in_order() {
        let log = log_with(&[10, 20, 30]);
        let records = log.read_from(1, 10).unwrap();
        let positions: Vec<u64> = records.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
        assert_eq!(log.head(), 4);

        let tail = log.read_from(2, 1).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].position, 2);
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let log = log_with(&[50, 40]);
        let records = log.read_from(1, 10).unwrap();
        assert_eq!(records[1].timestamp, 50);
    }

    #[test]
    fn timestamp_lookup() {
        let log = log_with(&[10, 20, 30]);
        assert_eq!(log.position_for_timestamp(0).unwrap(), 1);
        assert_eq!(log.position_for_timestamp(20).unwrap(), 2);
        assert_eq!(log.position_for_timestamp(21).unwrap(), 3);
        assert_eq!(log.position_for_timestamp(31).unwrap(), 4);
    }

    #[test]
    fn truncation_moves_floor_and_epoch() {
        let log = log_with(&[10, 20, 30, 40]);
        assert_eq!(log.truncate_before(3), 2);
        assert_eq!(log.retention_floor(), 3);
        assert_eq!(log.truncation_epoch(), 1);
        assert_eq!(log.read_from(3, 10).unwrap()[0].position, 3);
        assert!(matches!(
            log.read_from(2, 10),
            Err(LogError::Truncated {
                requested: 2,
                floor: 3
            })
        ));

        // No-op truncation keeps the epoch.
        assert_eq!(log.truncate_before(2), 0);
        assert_eq!(log.truncation_epoch(), 1);
    }

    #[test]
    fn truncation_past_head_empties_log() {
        let log = log_with(&[10, 20]);
        assert_eq!(log.truncate_before(100), 2);
        assert_eq!(log.retention_floor(), 3);
        assert_eq!(log.head(), 3);
        assert_eq!(log.position_for_timestamp(0).unwrap(), 3);

        let next = log.append(record("/b", 5));
        assert_eq!(next, 3);
        assert_eq!(log.read_from(3, 10).unwrap().len(), 1);
    }

    #[test]
    fn retention_by_age() {
        let log = log_with(&[1_000, 2_000, 3_000]);
        let removed = log.truncate_older_than(Duration::from_millis(2_500), 4_000);
        assert_eq!(removed, 1);
        assert_eq!(log.retention_floor(), 2);
    }

    #[test]
    fn load_seed_lines() {
        let seed = concat!(
            r#"{"path": "/users/ada", "event": "value", "value": {"name": "Ada"}, "timestamp": 1}"#,
            "\n\n",
            r#"{"path": "users/bob", "event": "child_added", "timestamp": 2, "context": {"by": "import"}}"#,
            "\n",
        );
        let log = MemoryMutationLog::with_id(3);
        assert_eq!(log.load_jsonl(seed.as_bytes()).unwrap(), 2);

        let records = log.read_from(1, 10).unwrap();
        assert_eq!(records[1].path.to_string(), "/users/bob");
        assert_eq!(records[1].context, json!({"by": "import"}));
        assert_eq!(records[1].value, serde_json::Value::Null);
    }

    #[test]
    fn load_seed_reports_bad_line() {
        let log = MemoryMutationLog::with_id(3);
        let seed = "{\"path\": \"/a\", \"event\": \"value\", \"timestamp\": 1}\nnot json\n";
        assert!(matches!(
            log.load_jsonl(seed.as_bytes()),
            Err(LogError::Corrupt { line: 2, .. })
        ));
    }

    #[test]
    fn load_seed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"path": "/a", "event": "mutated", "value": 1, "timestamp": 9}}"#
        )
        .unwrap();

        let log = MemoryMutationLog::with_id(3);
        assert_eq!(log.load_jsonl_file(file.path()).unwrap(), 1);
        assert_eq!(log.read_from(1, 1).unwrap()[0].event, EventName::Mutated);
    }
}
