//! Authorization of subscription targets.

use crate::error::ServerResult;
use crate::rules::{AccessIntent, Identity, RuleEvaluator};
use std::sync::Arc;
use tracing::debug;
use treesync_protocol::SubscriptionTarget;

/// A target that passed authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedTarget {
    /// Position of the target in the original request.
    pub index: usize,
    /// The target.
    pub target: SubscriptionTarget,
}

/// Targets that passed authorization, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizedTargets {
    /// Kept targets.
    pub entries: Vec<AuthorizedTarget>,
}

impl AuthorizedTargets {
    /// Returns true if every target was rejected.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of kept targets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns the kept targets without their indices.
    pub fn into_targets(self) -> Vec<SubscriptionTarget> {
        self.entries.into_iter().map(|e| e.target).collect()
    }
}

/// Drops the targets an identity may not read.
#[derive(Clone)]
pub struct AccessFilter {
    rules: Arc<dyn RuleEvaluator>,
}

impl AccessFilter {
    /// Creates a filter backed by `rules`.
    pub fn new(rules: Arc<dyn RuleEvaluator>) -> Self {
        Self { rules }
    }

    /// Checks every target and keeps the allowed ones.
    ///
    /// Targets with only child events are checked against `path/*`.
    pub fn filter(
        &self,
        identity: &Identity,
        targets: Vec<SubscriptionTarget>,
    ) -> ServerResult<AuthorizedTargets> {
        let mut entries = Vec::with_capacity(targets.len());
        for (index, target) in targets.into_iter().enumerate() {
            let check_path = target.check_path();
            let decision = self
                .rules
                .evaluate(identity, &check_path, AccessIntent::Read)?;
            if decision.allow {
                entries.push(AuthorizedTarget { index, target });
            } else {
                debug!(
                    %identity,
                    path = %check_path,
                    reason = %decision.reason,
                    "target not authorized"
                );
            }
        }
        Ok(AuthorizedTargets { entries })
    }
}

impl std::fmt::Debug for AccessFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessFilter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;
    use crate::rules::{AccessDecision, GrantRules, RuleError};
    use parking_lot::Mutex;
    use treesync_protocol::{EventName, TreePath};

    fn target(path: &str, events: Vec<EventName>) -> SubscriptionTarget {
        SubscriptionTarget::new(TreePath::parse(path).unwrap(), events).unwrap()
    }

    /// Records every checked path and allows a fixed set.
    struct Recording {
        allowed: Vec<&'static str>,
        checked: Mutex<Vec<String>>,
    }

    impl RuleEvaluator for Recording {
        fn evaluate(
            &self,
            _identity: &Identity,
            path: &TreePath,
            _intent: AccessIntent,
        ) -> Result<AccessDecision, RuleError> {
            let path = path.to_string();
            self.checked.lock().push(path.clone());
            Ok(AccessDecision {
                allow: self.allowed.contains(&path.as_str()),
                reason: "test".into(),
            })
        }
    }

    struct Broken;

    impl RuleEvaluator for Broken {
        fn evaluate(
            &self,
            _identity: &Identity,
            _path: &TreePath,
            _intent: AccessIntent,
        ) -> Result<AccessDecision, RuleError> {
            Err(RuleError::Evaluation("backend down".into()))
        }
    }

    #[test]
    fn child_only_targets_are_checked_against_wildcard() {
        let rules = Arc::new(Recording {
            allowed: vec!["/users/*"],
            checked: Mutex::new(Vec::new()),
        });
        let filter = AccessFilter::new(rules.clone());

        let targets = vec![
            target("/users", vec![EventName::ChildChanged]),
            target("/users", vec![EventName::Value]),
            target("/users", vec![EventName::ChildAdded, EventName::NotifyValue]),
        ];
        let authorized = filter.filter(&Identity::user("ada"), targets).unwrap();

        assert_eq!(authorized.len(), 1);
        assert_eq!(authorized.entries[0].index, 0);
        assert_eq!(
            *rules.checked.lock(),
            vec!["/users/*", "/users", "/users"]
        );
    }

    #[test]
    fn keeps_request_order_and_indices() {
        let rules = GrantRules::from_json(
            r#"{"grants": [{"path": "/a", "read": "anyone"}, {"path": "/c", "read": "anyone"}]}"#,
        )
        .unwrap();
        let filter = AccessFilter::new(Arc::new(rules));
        let targets = vec![
            target("/c", vec![]),
            target("/b", vec![]),
            target("/a", vec![]),
            target("/c", vec![]),
        ];

        let authorized = filter.filter(&Identity::Anonymous, targets).unwrap();
        let indices: Vec<usize> = authorized.entries.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 2, 3]);
        let paths: Vec<String> = authorized
            .into_targets()
            .iter()
            .map(|t| t.path.to_string())
            .collect();
        assert_eq!(paths, vec!["/c", "/a", "/c"]);
    }

    #[test]
    fn shorthand_and_explicit_value_are_equivalent() {
        let rules = GrantRules::from_json(
            r#"{"grants": [{"path": "/users", "read": "authenticated"}]}"#,
        )
        .unwrap();
        let filter = AccessFilter::new(Arc::new(rules));
        let ada = Identity::user("ada");

        let shorthand = vec![SubscriptionTarget::value(TreePath::parse("/users").unwrap())];
        let explicit = vec![target("/users", vec![EventName::Value])];
        assert_eq!(
            filter.filter(&ada, shorthand).unwrap(),
            filter.filter(&ada, explicit).unwrap()
        );
    }

    #[test]
    fn everything_denied_is_empty() {
        let filter = AccessFilter::new(Arc::new(GrantRules::default()));
        let authorized = filter
            .filter(&Identity::Anonymous, vec![target("/x", vec![])])
            .unwrap();
        assert!(authorized.is_empty());
    }

    #[test]
    fn evaluator_failure_is_unexpected() {
        let filter = AccessFilter::new(Arc::new(Broken));
        let err = filter
            .filter(&Identity::Anonymous, vec![target("/x", vec![])])
            .unwrap_err();
        assert!(matches!(err, ServerError::Rules(_)));
        assert_eq!(err.kind(), treesync_protocol::ErrorKind::Unexpected);
    }
}
