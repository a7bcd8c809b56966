//! Subscription targets and request parsing.

use crate::error::{ProtocolError, ProtocolResult};
use crate::event::{EventClass, EventName};
use crate::path::{TreePath, WILDCARD};
use crate::query::QueryStart;
use crate::record::MutationRecord;
use serde::{Deserialize, Serialize};

/// A (path, events) pair a client wants to be notified about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionTarget {
    /// Subscribed path; may end with a wildcard segment.
    pub path: TreePath,
    /// Accepted events; never empty.
    pub events: Vec<EventName>,
}

/// How a matching record is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// With its value.
    Full,
    /// Without its value (only `notify_*` subscriptions matched).
    Silent,
}

impl SubscriptionTarget {
    /// Creates a target, defaulting to `value` when `events` is empty.
    pub fn new(path: TreePath, events: Vec<EventName>) -> ProtocolResult<Self> {
        if !path.wildcard_is_trailing() {
            return Err(ProtocolError::invalid_path(
                path.to_string(),
                "wildcard is only allowed as the last segment",
            ));
        }
        let mut unique: Vec<EventName> = Vec::with_capacity(events.len());
        for event in events {
            if !unique.contains(&event) {
                unique.push(event);
            }
        }
        if unique.is_empty() {
            unique.push(EventName::Value);
        }
        Ok(Self {
            path,
            events: unique,
        })
    }

    /// Creates a `value` subscription on `path`.
    pub fn value(path: TreePath) -> Self {
        Self {
            path,
            events: vec![EventName::Value],
        }
    }

    /// Returns true if any subscribed event is value-class.
    pub fn has_value_event(&self) -> bool {
        self.events.iter().any(|e| e.class() == EventClass::Value)
    }

    /// Path that must be readable for this target to be served.
    ///
    /// Child-only targets need access to `path/*`, not to `path` itself.
    pub fn check_path(&self) -> TreePath {
        if self.has_value_event() {
            self.path.clone()
        } else {
            self.path.child(WILDCARD)
        }
    }

    /// Decides whether `record` is delivered for this target.
    pub fn delivery(&self, record: &MutationRecord) -> Option<Delivery> {
        let mut result = None;
        for event in &self.events {
            if !event.accepts(record.event) {
                continue;
            }
            let on_path = match event.class() {
                EventClass::Value => self.path.matches(&record.path),
                EventClass::Child => self.path.matches_child(&record.path),
            };
            if !on_path {
                continue;
            }
            if !event.is_notify() {
                return Some(Delivery::Full);
            }
            result = Some(Delivery::Silent);
        }
        result
    }
}

/// Raw parameters of a mutations request, as received at the HTTP boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationsRequest {
    /// Single-path shorthand.
    #[serde(default)]
    pub path: Option<String>,
    /// JSON-encoded array of `{path, events}`.
    #[serde(default, rename = "for")]
    pub for_targets: Option<String>,
    /// Resume cursor.
    #[serde(default)]
    pub cursor: Option<String>,
    /// Lower time bound, ms since epoch.
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl MutationsRequest {
    /// Creates a single-path request.
    pub fn for_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Creates a request from a list of targets, encoding them as JSON.
    pub fn for_targets(targets: &[SubscriptionTarget]) -> Self {
        let raw: Vec<RawTarget> = targets
            .iter()
            .map(|t| RawTarget {
                path: t.path.to_string(),
                events: Some(t.events.iter().map(|e| e.as_str().to_string()).collect()),
            })
            .collect();
        Self {
            for_targets: serde_json::to_string(&raw).ok(),
            ..Default::default()
        }
    }

    /// Sets the cursor.
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    /// Sets the timestamp.
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp.to_string());
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RawTarget {
    path: String,
    #[serde(default)]
    events: Option<Vec<String>>,
}

/// The two accepted target shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    /// `{path}` shorthand.
    Single(TreePath),
    /// `{for: [...]}`.
    Multi(Vec<SubscriptionTarget>),
}

impl TargetSpec {
    /// Resolves the spec into its canonical target list.
    pub fn into_targets(self) -> Vec<SubscriptionTarget> {
        match self {
            TargetSpec::Single(path) => vec![SubscriptionTarget::value(path)],
            TargetSpec::Multi(targets) if targets.is_empty() => {
                vec![SubscriptionTarget::value(TreePath::root())]
            }
            TargetSpec::Multi(targets) => targets,
        }
    }
}

/// A fully validated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    /// Requested targets, in request order.
    pub targets: Vec<SubscriptionTarget>,
    /// Lower bound of the scan.
    pub start: QueryStart,
}

/// Normalizes request parameters into targets and a start position.
pub struct TargetParser;

impl TargetParser {
    /// Parses and validates a request.
    pub fn parse(request: &MutationsRequest) -> ProtocolResult<ParsedRequest> {
        let targets = Self::parse_spec(request)?.into_targets();
        let start = Self::parse_start(request)?;
        Ok(ParsedRequest { targets, start })
    }

    /// Determines which target shape the request uses.
    pub fn parse_spec(request: &MutationsRequest) -> ProtocolResult<TargetSpec> {
        if let Some(path) = &request.path {
            let target = SubscriptionTarget::new(TreePath::parse(path)?, Vec::new())?;
            return Ok(TargetSpec::Single(target.path));
        }
        let Some(raw) = &request.for_targets else {
            return Err(ProtocolError::invalid_request(
                "request needs either 'path' or 'for'",
            ));
        };

        let raw_targets: Vec<RawTarget> = serde_json::from_str(raw)
            .map_err(|e| ProtocolError::invalid_request(format!("invalid 'for': {}", e)))?;

        let mut targets = Vec::with_capacity(raw_targets.len());
        for raw_target in raw_targets {
            let path = TreePath::parse(&raw_target.path)?;
            let events = raw_target
                .events
                .unwrap_or_default()
                .iter()
                .map(|e| e.parse::<EventName>())
                .collect::<ProtocolResult<Vec<_>>>()?;
            targets.push(SubscriptionTarget::new(path, events)?);
        }
        Ok(TargetSpec::Multi(targets))
    }

    /// Resolves the scan start; a cursor wins over a timestamp.
    pub fn parse_start(request: &MutationsRequest) -> ProtocolResult<QueryStart> {
        if let Some(cursor) = non_empty(&request.cursor) {
            return Ok(QueryStart::Cursor(cursor.to_string()));
        }
        if let Some(timestamp) = non_empty(&request.timestamp) {
            let millis = timestamp.parse::<u64>().map_err(|_| {
                ProtocolError::invalid_request(format!("invalid timestamp: {:?}", timestamp))
            })?;
            return Ok(QueryStart::Timestamp(millis));
        }
        Ok(QueryStart::Beginning)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
