//! Subscription event vocabulary.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Class of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    /// The path's own value changed.
    Value,
    /// A direct child of the path changed.
    Child,
}

/// An event a client can subscribe to.
///
/// `notify_*` variants are silent: records delivered for them carry no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    /// Value changed.
    Value,
    /// Value changed (silent).
    NotifyValue,
    /// Batched mutations on the path.
    Mutations,
    /// Single mutation on the path.
    Mutated,
    /// Child added.
    ChildAdded,
    /// Child removed.
    ChildRemoved,
    /// Child changed.
    ChildChanged,
    /// Child added (silent).
    NotifyChildAdded,
    /// Child removed (silent).
    NotifyChildRemoved,
    /// Child changed (silent).
    NotifyChildChanged,
}

impl EventName {
    /// Every known event.
    pub const ALL: [EventName; 10] = [
        EventName::Value,
        EventName::NotifyValue,
        EventName::Mutations,
        EventName::Mutated,
        EventName::ChildAdded,
        EventName::ChildRemoved,
        EventName::ChildChanged,
        EventName::NotifyChildAdded,
        EventName::NotifyChildRemoved,
        EventName::NotifyChildChanged,
    ];

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::Value => "value",
            EventName::NotifyValue => "notify_value",
            EventName::Mutations => "mutations",
            EventName::Mutated => "mutated",
            EventName::ChildAdded => "child_added",
            EventName::ChildRemoved => "child_removed",
            EventName::ChildChanged => "child_changed",
            EventName::NotifyChildAdded => "notify_child_added",
            EventName::NotifyChildRemoved => "notify_child_removed",
            EventName::NotifyChildChanged => "notify_child_changed",
        }
    }

    /// Returns the event class.
    pub fn class(&self) -> EventClass {
        match self.base() {
            EventName::ChildAdded | EventName::ChildRemoved | EventName::ChildChanged => {
                EventClass::Child
            }
            _ => EventClass::Value,
        }
    }

    /// Returns true for the silent `notify_*` variants.
    pub fn is_notify(&self) -> bool {
        self.base() != *self
    }

    /// Returns the event with any `notify_` prefix removed.
    pub fn base(&self) -> EventName {
        match self {
            EventName::NotifyValue => EventName::Value,
            EventName::NotifyChildAdded => EventName::ChildAdded,
            EventName::NotifyChildRemoved => EventName::ChildRemoved,
            EventName::NotifyChildChanged => EventName::ChildChanged,
            other => *other,
        }
    }

    /// Returns true if a subscription to `self` accepts a record logged as `recorded`.
    ///
    /// Value-class subscriptions accept any value-class record; child-class
    /// subscriptions only accept the same child event.
    pub fn accepts(&self, recorded: EventName) -> bool {
        let wanted = self.base();
        let recorded = recorded.base();
        match wanted.class() {
            EventClass::Value => recorded.class() == EventClass::Value,
            EventClass::Child => wanted == recorded,
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventName::ALL
            .iter()
            .copied()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownEvent(s.to_string()))
    }
}
