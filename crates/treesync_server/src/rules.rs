//! Authorization collaborator and a JSON grant evaluator.
//!
//! ## Grant File
//!
//! ```json
//! {
//!   "grants": [
//!     { "path": "/users/*", "read": "authenticated" },
//!     { "path": "/users/$uid", "read": "owner:$uid", "write": "owner:$uid" },
//!     { "path": "/public", "read": "anyone" },
//!     { "path": "/ops", "read": "users:ada,grace" }
//!   ]
//! }
//! ```
//!
//! A grant applies to its path and everything below it. `*` and `$name`
//! segments match any single segment; `$name` also binds it for `owner:`.
//! Access is denied unless some grant allows it. Admins bypass the rules.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use treesync_protocol::{TreePath, WILDCARD};

/// Who is making a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// No signed-in user.
    Anonymous,
    /// A signed-in user.
    User {
        /// User id.
        uid: String,
    },
    /// The database administrator.
    Admin,
}

impl Identity {
    /// Creates a user identity.
    pub fn user(uid: impl Into<String>) -> Self {
        Identity::User { uid: uid.into() }
    }

    /// Returns the user id, if signed in as a regular user.
    pub fn uid(&self) -> Option<&str> {
        match self {
            Identity::User { uid } => Some(uid),
            _ => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Anonymous => f.write_str("anonymous"),
            Identity::User { uid } => write!(f, "user:{}", uid),
            Identity::Admin => f.write_str("admin"),
        }
    }
}

/// Kind of access being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessIntent {
    /// Reading data or subscribing to changes.
    Read,
    /// Writing data.
    Write,
}

/// Result of a rule evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    /// Whether access is allowed.
    pub allow: bool,
    /// Human-readable reason, for logs.
    pub reason: String,
}

impl AccessDecision {
    /// An allowing decision.
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allow: true,
            reason: reason.into(),
        }
    }

    /// A denying decision.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            reason: reason.into(),
        }
    }
}

/// Errors raised by rule evaluators.
#[derive(Error, Debug)]
pub enum RuleError {
    /// The rule definition is invalid.
    #[error("invalid rules: {0}")]
    InvalidRules(String),

    /// The rule file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The evaluator failed while checking access.
    #[error("evaluation failed: {0}")]
    Evaluation(String),
}

/// Decides whether an identity may access a path.
pub trait RuleEvaluator: Send + Sync {
    /// Evaluates access to `path`.
    fn evaluate(
        &self,
        identity: &Identity,
        path: &TreePath,
        intent: AccessIntent,
    ) -> Result<AccessDecision, RuleError>;
}

/// Who a grant applies to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Audience {
    /// Everyone, including anonymous requests.
    Anyone,
    /// Any signed-in user.
    Authenticated,
    /// The user whose id equals the bound path variable.
    Owner(String),
    /// Listed users.
    Users(Vec<String>),
    /// No one.
    #[default]
    Nobody,
}

impl Audience {
    fn allows(&self, identity: &Identity, bindings: &HashMap<&str, &str>) -> bool {
        match self {
            Audience::Anyone => true,
            Audience::Nobody => false,
            Audience::Authenticated => identity.uid().is_some(),
            Audience::Owner(var) => match (identity.uid(), bindings.get(var.as_str())) {
                (Some(uid), Some(bound)) => *bound != WILDCARD && *bound == uid,
                _ => false,
            },
            Audience::Users(users) => identity
                .uid()
                .map(|uid| users.iter().any(|u| u == uid))
                .unwrap_or(false),
        }
    }
}

impl FromStr for Audience {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "anyone" => return Ok(Audience::Anyone),
            "authenticated" => return Ok(Audience::Authenticated),
            "nobody" => return Ok(Audience::Nobody),
            _ => {}
        }
        if let Some(var) = s.strip_prefix("owner:") {
            let var = var.trim();
            if !var.starts_with('$') || var.len() < 2 {
                return Err(RuleError::InvalidRules(format!(
                    "owner audience needs a $variable: {:?}",
                    s
                )));
            }
            return Ok(Audience::Owner(var.to_string()));
        }
        if let Some(list) = s.strip_prefix("users:") {
            let users: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect();
            return Ok(Audience::Users(users));
        }
        Err(RuleError::InvalidRules(format!("unknown audience: {:?}", s)))
    }
}

impl TryFrom<String> for Audience {
    type Error = RuleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Audience> for String {
    fn from(audience: Audience) -> Self {
        audience.to_string()
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Audience::Anyone => f.write_str("anyone"),
            Audience::Authenticated => f.write_str("authenticated"),
            Audience::Owner(var) => write!(f, "owner:{}", var),
            Audience::Users(users) => write!(f, "users:{}", users.join(",")),
            Audience::Nobody => f.write_str("nobody"),
        }
    }
}

/// A single access grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Path pattern the grant starts at.
    pub path: TreePath,
    /// Who may read.
    #[serde(default)]
    pub read: Audience,
    /// Who may write.
    #[serde(default)]
    pub write: Audience,
}

impl Grant {
    /// Binds pattern variables if the grant covers `path`.
    fn bind<'a>(&'a self, path: &'a TreePath) -> Option<HashMap<&'a str, &'a str>> {
        if self.path.len() > path.len() {
            return None;
        }
        let mut bindings = HashMap::new();
        for (pattern, segment) in self.path.segments().iter().zip(path.segments()) {
            if pattern.starts_with('$') {
                bindings.insert(pattern.as_str(), segment.as_str());
            } else if pattern != WILDCARD && pattern != segment {
                return None;
            }
        }
        Some(bindings)
    }

    fn audience(&self, intent: AccessIntent) -> &Audience {
        match intent {
            AccessIntent::Read => &self.read,
            AccessIntent::Write => &self.write,
        }
    }
}

#[derive(Deserialize)]
struct GrantFile {
    #[serde(default)]
    grants: Vec<Grant>,
}

/// Rule evaluator backed by a list of grants.
#[derive(Debug, Clone, Default)]
pub struct GrantRules {
    grants: Vec<Grant>,
}

impl GrantRules {
    /// Creates an evaluator, validating the grants.
    pub fn new(grants: Vec<Grant>) -> Result<Self, RuleError> {
        for grant in &grants {
            for audience in [&grant.read, &grant.write] {
                if let Audience::Owner(var) = audience {
                    if !grant.path.segments().iter().any(|s| s == var) {
                        return Err(RuleError::InvalidRules(format!(
                            "{} is not bound by path {}",
                            var, grant.path
                        )));
                    }
                }
            }
        }
        Ok(Self { grants })
    }

    /// Parses a JSON grant file.
    pub fn from_json(json: &str) -> Result<Self, RuleError> {
        let file: GrantFile =
            serde_json::from_str(json).map_err(|e| RuleError::InvalidRules(e.to_string()))?;
        Self::new(file.grants)
    }

    /// Reads a JSON grant file from disk.
    pub fn from_file(path: &Path) -> Result<Self, RuleError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Returns the grants.
    pub fn grants(&self) -> &[Grant] {
        &self.grants
    }
}

impl RuleEvaluator for GrantRules {
    fn evaluate(
        &self,
        identity: &Identity,
        path: &TreePath,
        intent: AccessIntent,
    ) -> Result<AccessDecision, RuleError> {
        if *identity == Identity::Admin {
            return Ok(AccessDecision::allow("admin"));
        }

        for grant in &self.grants {
            let Some(bindings) = grant.bind(path) else {
                continue;
            };
            if grant.audience(intent).allows(identity, &bindings) {
                return Ok(AccessDecision::allow(format!("granted by {}", grant.path)));
            }
        }
        Ok(AccessDecision::deny(format!("no grant covers {}", path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r#"{
        "grants": [
            { "path": "/users/*", "read": "authenticated" },
            { "path": "/users/$uid", "read": "owner:$uid", "write": "owner:$uid" },
            { "path": "/public", "read": "anyone" },
            { "path": "/ops", "read": "users:ada, grace" }
        ]
    }"#;

    fn rules() -> GrantRules {
        GrantRules::from_json(RULES).unwrap()
    }

    fn p(raw: &str) -> TreePath {
        TreePath::parse(raw).unwrap()
    }

    fn read(identity: &Identity, path: &str) -> bool {
        rules()
            .evaluate(identity, &p(path), AccessIntent::Read)
            .unwrap()
            .allow
    }

    #[test]
    fn grants_inherit_to_descendants() {
        let ada = Identity::user("ada");
        assert!(read(&Identity::Anonymous, "/public"));
        assert!(read(&Identity::Anonymous, "/public/news/1"));
        assert!(!read(&Identity::Anonymous, "/"));
        assert!(read(&ada, "/users/bob/name"));
    }

    #[test]
    fn wildcard_grant_does_not_cover_parent() {
        let ada = Identity::user("ada");
        assert!(read(&ada, "/users/*"));
        assert!(!read(&ada, "/users"));
        assert!(!read(&Identity::Anonymous, "/users/*"));
    }

    #[test]
    fn owner_is_bound_to_path_variable() {
        let rules = rules();
        let ada = Identity::user("ada");
        let write = |id: &Identity, path: &str| {
            rules
                .evaluate(id, &p(path), AccessIntent::Write)
                .unwrap()
                .allow
        };
        assert!(write(&ada, "/users/ada/email"));
        assert!(!write(&ada, "/users/bob/email"));
        assert!(!write(&ada, "/users/*"));
        assert!(!write(&Identity::Anonymous, "/users/ada"));
    }

    #[test]
    fn listed_users() {
        assert!(read(&Identity::user("grace"), "/ops/alerts"));
        assert!(!read(&Identity::user("bob"), "/ops"));
    }

    #[test]
    fn admin_bypasses_rules() {
        let decision = GrantRules::default()
            .evaluate(&Identity::Admin, &p("/secret"), AccessIntent::Write)
            .unwrap();
        assert!(decision.allow);
        assert_eq!(decision.reason, "admin");
    }

    #[test]
    fn default_is_deny() {
        let decision = GrantRules::default()
            .evaluate(&Identity::user("ada"), &p("/a"), AccessIntent::Read)
            .unwrap();
        assert!(!decision.allow);
    }

    #[test]
    fn rejects_unbound_owner_variable() {
        let json = r#"{"grants": [{"path": "/users", "read": "owner:$uid"}]}"#;
        assert!(matches!(
            GrantRules::from_json(json),
            Err(RuleError::InvalidRules(_))
        ));
    }

    #[test]
    fn rejects_unknown_audience() {
        let json = r#"{"grants": [{"path": "/a", "read": "friends"}]}"#;
        assert!(GrantRules::from_json(json).is_err());
    }

    #[test]
    fn audience_round_trips_through_text() {
        for text in ["anyone", "authenticated", "owner:$uid", "users:a,b", "nobody"] {
            let audience: Audience = text.parse().unwrap();
            assert_eq!(audience.to_string(), text);
        }
    }
}
