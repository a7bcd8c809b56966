//! Cluster role routing.

use crate::config::{ClusterRole, ServerConfig};
use crate::engine::MutationQueryEngine;
use crate::error::{ServerError, ServerResult};
use crate::log::MutationLog;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use treesync_cluster::{MasterListener, WorkerLink};
use treesync_protocol::{MutationBatch, MutationQuery};

enum Route {
    Local(Arc<MutationQueryEngine>),
    Master {
        engine: Arc<MutationQueryEngine>,
        listener: MasterListener,
    },
    Worker(WorkerLink),
}

/// Decides which process answers a query.
///
/// Standalone and master processes query their own log; a worker forwards
/// every query to the master over the IPC channel.
pub struct ClusterCoordinator {
    role: ClusterRole,
    route: Route,
}

impl ClusterCoordinator {
    /// Sets up the role described by `config`.
    ///
    /// `log` is only read by standalone and master processes.
    pub async fn start(config: &ServerConfig, log: Arc<dyn MutationLog>) -> ServerResult<Self> {
        let role = config.cluster.role();
        let engine = || Arc::new(MutationQueryEngine::new(log.clone(), config.max_scan_batch));

        let route = match (role, config.cluster.ipc()) {
            (ClusterRole::Standalone, _) => Route::Local(engine()),
            (ClusterRole::Master, Some(ipc)) => {
                let engine = engine();
                let listener = MasterListener::bind(ipc.clone(), engine.clone()).await?;
                Route::Master { engine, listener }
            }
            (ClusterRole::Worker, Some(ipc)) => Route::Worker(WorkerLink::spawn(ipc.clone())?),
            (_, None) => {
                return Err(ServerError::Config(format!(
                    "{} role requires IPC settings",
                    role
                )))
            }
        };

        info!(%role, db = %config.db_name, "cluster coordinator started");
        Ok(Self { role, route })
    }

    /// Returns the role of this process.
    pub fn role(&self) -> ClusterRole {
        self.role
    }

    /// Returns the address the master listens on for workers.
    pub fn ipc_addr(&self) -> Option<SocketAddr> {
        match &self.route {
            Route::Master { listener, .. } => Some(listener.local_addr()),
            _ => None,
        }
    }

    /// Returns true if queries can currently be answered.
    ///
    /// Always true except for a worker without a master connection.
    pub fn is_ready(&self) -> bool {
        match &self.route {
            Route::Worker(link) => link.is_connected(),
            _ => true,
        }
    }

    /// Waits until a worker is connected to its master, up to `timeout`.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        match &self.route {
            Route::Worker(link) => link.wait_connected(timeout).await,
            _ => true,
        }
    }

    /// Answers a query locally or through the master.
    pub async fn query(&self, query: MutationQuery) -> ServerResult<MutationBatch> {
        match &self.route {
            Route::Local(engine) | Route::Master { engine, .. } => {
                let engine = Arc::clone(engine);
                tokio::task::spawn_blocking(move || engine.query(&query))
                    .await
                    .map_err(|e| {
                        error!(error = %e, "mutation query panicked");
                        ServerError::Internal("mutation query failed".into())
                    })?
            }
            Route::Worker(link) => Ok(link.forward(query).await?),
        }
    }
}

impl std::fmt::Debug for ClusterCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterCoordinator")
            .field("role", &self.role)
            .field("ipc_addr", &self.ipc_addr())
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use crate::log::MemoryMutationLog;
    use serde_json::json;
    use treesync_cluster::{IpcConfig, RetryConfig};
    use treesync_protocol::{ErrorKind, EventName, QueryStart, SubscriptionTarget, TreePath};

    fn seeded_log() -> Arc<MemoryMutationLog> {
        let log = Arc::new(MemoryMutationLog::with_id(5));
        log.record(TreePath::parse("/a").unwrap(), EventName::Value, json!(1));
        log
    }

    fn all() -> MutationQuery {
        MutationQuery::new(
            vec![SubscriptionTarget::value(TreePath::parse("/a").unwrap())],
            QueryStart::Beginning,
        )
    }

    #[tokio::test]
    async fn standalone_queries_locally() {
        let coordinator = ClusterCoordinator::start(&ServerConfig::new("db"), seeded_log())
            .await
            .unwrap();
        assert_eq!(coordinator.role(), ClusterRole::Standalone);
        assert!(coordinator.is_ready());
        assert_eq!(coordinator.ipc_addr(), None);
        assert_eq!(coordinator.query(all()).await.unwrap().records.len(), 1);
    }

    #[tokio::test]
    async fn worker_relays_master_answers() {
        let master_config = ServerConfig::new("db").with_cluster(ClusterConfig::master(
            IpcConfig::new("127.0.0.1", 0, "token"),
        ));
        let master = ClusterCoordinator::start(&master_config, seeded_log())
            .await
            .unwrap();
        let port = master.ipc_addr().unwrap().port();

        let ipc = IpcConfig::new("127.0.0.1", port, "token")
            .with_retry(RetryConfig::fixed(Duration::from_millis(20)));
        let worker_config = ServerConfig::new("db").with_cluster(ClusterConfig::worker(ipc));
        // The worker never reads its own log.
        let worker = ClusterCoordinator::start(&worker_config, Arc::new(MemoryMutationLog::new()))
            .await
            .unwrap();
        assert!(worker.wait_ready(Duration::from_secs(5)).await);

        let batch = worker.query(all()).await.unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].value, json!(1));
    }

    #[tokio::test]
    async fn worker_without_master_is_unavailable() {
        let ipc = IpcConfig::new("127.0.0.1", 1, "token");
        let config = ServerConfig::new("db").with_cluster(ClusterConfig::worker(ipc));
        let worker = ClusterCoordinator::start(&config, seeded_log()).await.unwrap();

        assert!(!worker.is_ready());
        let err = worker.query(all()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    }
}
