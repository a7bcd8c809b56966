//! Server configuration.

use crate::error::{ServerError, ServerResult};
use std::fmt;
use std::time::Duration;
use treesync_cluster::IpcConfig;

/// Default upper bound on records scanned per query.
pub const DEFAULT_MAX_SCAN_BATCH: usize = 10_000;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name of the database served under `/sync/mutations/{name}`.
    pub db_name: String,
    /// Mutation logging settings.
    pub transactions: TransactionLogConfig,
    /// Maximum number of log records scanned by one query.
    pub max_scan_batch: usize,
    /// Cluster role of this process.
    pub cluster: ClusterConfig,
}

impl ServerConfig {
    /// Creates a standalone configuration for `db_name`.
    pub fn new(db_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            transactions: TransactionLogConfig::default(),
            max_scan_batch: DEFAULT_MAX_SCAN_BATCH,
            cluster: ClusterConfig::standalone(),
        }
    }

    /// Sets the mutation logging settings.
    pub fn with_transactions(mut self, transactions: TransactionLogConfig) -> Self {
        self.transactions = transactions;
        self
    }

    /// Sets the scan batch bound.
    pub fn with_max_scan_batch(mut self, size: usize) -> Self {
        self.max_scan_batch = size;
        self
    }

    /// Sets the cluster role.
    pub fn with_cluster(mut self, cluster: ClusterConfig) -> Self {
        self.cluster = cluster;
        self
    }

    /// Checks the configuration for obvious mistakes.
    pub fn validate(&self) -> ServerResult<()> {
        if self.db_name.trim().is_empty() {
            return Err(ServerError::Config("database name is required".into()));
        }
        if self.max_scan_batch == 0 {
            return Err(ServerError::Config("max scan batch must be positive".into()));
        }
        if let Some(ipc) = self.cluster.ipc() {
            ipc.validate()?;
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

/// Mutation logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionLogConfig {
    /// Whether mutations are logged at all. The feed is unavailable without it.
    pub enabled: bool,
    /// How long records are retained.
    pub max_age: Duration,
}

impl TransactionLogConfig {
    /// Logging enabled with the given retention in days.
    pub fn enabled(max_age_days: u64) -> Self {
        Self {
            enabled: true,
            max_age: Duration::from_secs(max_age_days.saturating_mul(24 * 60 * 60)),
        }
    }

    /// Logging disabled.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

impl Default for TransactionLogConfig {
    fn default() -> Self {
        Self::enabled(30)
    }
}

/// Role of this process in a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterRole {
    /// Single process owning the log.
    Standalone,
    /// Owns the log and serves workers.
    Master,
    /// Forwards every query to the master.
    Worker,
}

impl fmt::Display for ClusterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClusterRole::Standalone => "standalone",
            ClusterRole::Master => "master",
            ClusterRole::Worker => "worker",
        })
    }
}

/// Cluster role plus its IPC settings.
///
/// Fixed for the lifetime of the process; construct it once at startup.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    role: ClusterRole,
    ipc: Option<IpcConfig>,
}

impl ClusterConfig {
    /// A standalone process.
    pub fn standalone() -> Self {
        Self {
            role: ClusterRole::Standalone,
            ipc: None,
        }
    }

    /// A master listening on `ipc`.
    pub fn master(ipc: IpcConfig) -> Self {
        Self {
            role: ClusterRole::Master,
            ipc: Some(ipc),
        }
    }

    /// A worker connecting to the master at `ipc`.
    pub fn worker(ipc: IpcConfig) -> Self {
        Self {
            role: ClusterRole::Worker,
            ipc: Some(ipc),
        }
    }

    /// Returns the role.
    pub fn role(&self) -> ClusterRole {
        self.role
    }

    /// Returns the IPC settings (none when standalone).
    pub fn ipc(&self) -> Option<&IpcConfig> {
        self.ipc.as_ref()
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self::standalone()
    }
}
