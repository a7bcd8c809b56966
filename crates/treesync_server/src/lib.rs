//! # TreeSync Server
//!
//! Cursor-based mutation feed for TreeSync.
//!
//! This crate provides:
//! - The mutation query engine (cursor resolution, target matching, batching)
//! - Access filtering of subscription targets against a rule evaluator
//! - Cluster role routing (standalone, master, worker)
//! - The sync endpoint that ties parsing, filtering and querying together
//!
//! # Architecture
//!
//! ```text
//! request → SyncEndpoint → TargetParser → AccessFilter
//!         → ClusterCoordinator → (local engine | master over IPC)
//!         → MutationBatch + new cursor
//! ```
//!
//! The storage engine and the authorization rules are collaborators reached
//! through the [`MutationLog`] and [`RuleEvaluator`] traits. An in-memory log
//! and a JSON grant evaluator are included for running the feed standalone.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use treesync_server::{GrantRules, MemoryMutationLog, ServerConfig, SyncServer};
//!
//! let log = Arc::new(MemoryMutationLog::new());
//! let rules = Arc::new(GrantRules::from_json(r#"{"grants": [{"path": "/", "read": "anyone"}]}"#)?);
//! let server = SyncServer::start(ServerConfig::new("mydb"), log, rules).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod access;
mod config;
mod coordinator;
mod endpoint;
mod engine;
mod error;
mod log;
mod rules;
mod server;

pub use access::{AccessFilter, AuthorizedTarget, AuthorizedTargets};
pub use config::{
    ClusterConfig, ClusterRole, ServerConfig, TransactionLogConfig, DEFAULT_MAX_SCAN_BATCH,
};
pub use coordinator::ClusterCoordinator;
pub use endpoint::{EndpointResponse, SyncEndpoint, CONTEXT_HEADER};
pub use engine::MutationQueryEngine;
pub use error::{ServerError, ServerResult};
pub use log::{now_millis, LogError, LogResult, MemoryMutationLog, MutationLog};
pub use rules::{
    AccessDecision, AccessIntent, Audience, Grant, GrantRules, Identity, RuleError,
    RuleEvaluator,
};
pub use server::SyncServer;
