//! Check-rules command implementation.

use super::OutputFormat;
use crate::http::parse_identity;
use serde::Serialize;
use std::path::Path;
use treesync_protocol::TreePath;
use treesync_server::{AccessIntent, GrantRules, RuleEvaluator};

/// Outcome of a rule check.
#[derive(Debug, Serialize)]
pub struct RuleCheck {
    /// Identity that was checked.
    pub identity: String,
    /// Normalized path.
    pub path: String,
    /// `read` or `write`.
    pub intent: &'static str,
    /// Whether access is allowed.
    pub allow: bool,
    /// Reason reported by the evaluator.
    pub reason: String,
    /// Number of grants in the file.
    pub grant_count: usize,
}

/// Evaluates the grant file at `rules` for one identity and path.
pub fn check(
    rules: &Path,
    path: &str,
    identity: &str,
    write: bool,
) -> Result<RuleCheck, Box<dyn std::error::Error>> {
    let rules = GrantRules::from_file(rules)?;
    let identity = parse_identity(identity)?;
    let path = TreePath::parse(path)?;
    let intent = if write {
        AccessIntent::Write
    } else {
        AccessIntent::Read
    };

    let decision = rules.evaluate(&identity, &path, intent)?;
    Ok(RuleCheck {
        identity: identity.to_string(),
        path: path.to_string(),
        intent: if write { "write" } else { "read" },
        allow: decision.allow,
        reason: decision.reason,
        grant_count: rules.grants().len(),
    })
}

/// Runs the check-rules command.
pub fn run(
    rules: &Path,
    path: &str,
    identity: &str,
    write: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let format = OutputFormat::parse(format)?;
    let result = check(rules, path, identity, write)?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Text => {
            println!("Rules: {} grant(s)", result.grant_count);
            println!(
                "{} {} {}: {}",
                result.identity,
                result.intent,
                result.path,
                if result.allow { "ALLOWED" } else { "DENIED" }
            );
            println!("  Reason: {}", result.reason);
        }
    }

    Ok(())
}
