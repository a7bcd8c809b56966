//! Mutation log records.

use crate::event::EventName;
use crate::path::TreePath;
use serde::{Deserialize, Serialize};

/// A single data change stored in the mutation log.
///
/// Records are immutable once written. `position` is strictly increasing and
/// assigned only by the process owning the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    /// Log position.
    pub position: u64,
    /// Path that changed.
    pub path: TreePath,
    /// Event the change was logged as.
    pub event: EventName,
    /// New value (null for deletions and silent deliveries).
    #[serde(default)]
    pub value: serde_json::Value,
    /// Context the writer attached to the change.
    #[serde(default)]
    pub context: serde_json::Value,
    /// Wall-clock time of the change, in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// True when the value was withheld because only silent subscriptions matched.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub silent: bool,
}

impl MutationRecord {
    /// Creates a record that has not been assigned a position yet.
    pub fn new(path: TreePath, event: EventName, value: serde_json::Value, timestamp: u64) -> Self {
        Self {
            position: 0,
            path,
            event,
            value,
            context: serde_json::Value::Null,
            timestamp,
            silent: false,
        }
    }

    /// Sets the writer context.
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    /// Returns a copy without the value payload.
    pub fn to_silent(&self) -> Self {
        Self {
            value: serde_json::Value::Null,
            silent: true,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_shape() {
        let record = MutationRecord {
            position: 7,
            ..MutationRecord::new(
                TreePath::parse("/users/ada").unwrap(),
                EventName::ChildChanged,
                json!({"name": "Ada"}),
                1_700_000_000_000,
            )
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["path"], "/users/ada");
        assert_eq!(json["event"], "child_changed");
        assert_eq!(json["position"], 7);
        assert!(json.get("silent").is_none());
    }

    #[test]
    fn silent_copy_drops_value() {
        let record = MutationRecord::new(
            TreePath::parse("/a").unwrap(),
            EventName::Value,
            json!(42),
            1,
        )
        .with_context(json!({"by": "test"}));
        let silent = record.to_silent();
        assert!(silent.silent);
        assert_eq!(silent.value, serde_json::Value::Null);
        assert_eq!(silent.context, record.context);
    }
}
