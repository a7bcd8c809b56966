//! Error types for the CLI.

use thiserror::Error;

/// Errors raised while turning command-line input into server settings.
#[derive(Error, Debug)]
pub enum CliError {
    /// Inconsistent settings.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An identity string that maps to no identity.
    #[error("invalid identity: {0:?}")]
    InvalidIdentity(String),

    /// Unknown `--format` value.
    #[error("unknown output format: {0} (expected text or json)")]
    UnknownFormat(String),
}
