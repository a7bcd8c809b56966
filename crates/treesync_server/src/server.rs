//! Main sync server.

use crate::access::AccessFilter;
use crate::config::{ClusterRole, ServerConfig};
use crate::coordinator::ClusterCoordinator;
use crate::endpoint::{EndpointResponse, SyncEndpoint};
use crate::error::ServerResult;
use crate::log::MutationLog;
use crate::rules::{Identity, RuleEvaluator};
use std::sync::Arc;
use tracing::info;
use treesync_protocol::MutationsRequest;

/// The sync server.
///
/// Owns the cluster coordinator and the endpoint for one database. The
/// HTTP layer calls [`SyncServer::handle`] for every mutations request.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use treesync_server::{GrantRules, Identity, MemoryMutationLog, ServerConfig, SyncServer};
/// use treesync_protocol::MutationsRequest;
///
/// let server = SyncServer::start(
///     ServerConfig::new("mydb"),
///     Arc::new(MemoryMutationLog::new()),
///     Arc::new(GrantRules::default()),
/// )
/// .await?;
/// let response = server
///     .handle(Some(&Identity::Admin), &MutationsRequest::for_path("/"))
///     .await;
/// ```
#[derive(Debug)]
pub struct SyncServer {
    config: Arc<ServerConfig>,
    coordinator: Arc<ClusterCoordinator>,
    endpoint: SyncEndpoint,
}

impl SyncServer {
    /// Validates `config`, sets up the cluster role and the endpoint.
    pub async fn start(
        config: ServerConfig,
        log: Arc<dyn MutationLog>,
        rules: Arc<dyn RuleEvaluator>,
    ) -> ServerResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let coordinator = Arc::new(ClusterCoordinator::start(&config, log).await?);
        let endpoint = SyncEndpoint::new(
            Arc::clone(&config),
            AccessFilter::new(rules),
            Arc::clone(&coordinator),
        );

        info!(
            db = %config.db_name,
            role = %coordinator.role(),
            logging = config.transactions.enabled,
            "sync server started"
        );
        Ok(Self {
            config,
            coordinator,
            endpoint,
        })
    }

    /// Handles a mutations request.
    pub async fn handle(
        &self,
        identity: Option<&Identity>,
        request: &MutationsRequest,
    ) -> EndpointResponse {
        self.endpoint.handle(identity, request).await
    }

    /// Answers a request whose parameters could not be decoded.
    pub fn reject_malformed(&self, detail: &str) -> EndpointResponse {
        self.endpoint.reject_malformed(detail)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the served database name.
    pub fn db_name(&self) -> &str {
        &self.config.db_name
    }

    /// Returns the cluster role.
    pub fn role(&self) -> ClusterRole {
        self.coordinator.role()
    }

    /// Returns the cluster coordinator.
    pub fn coordinator(&self) -> &ClusterCoordinator {
        &self.coordinator
    }

    /// Returns the endpoint.
    pub fn endpoint(&self) -> &SyncEndpoint {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryMutationLog;
    use crate::rules::GrantRules;
    use serde_json::json;
    use treesync_protocol::{EventName, TreePath};

    #[tokio::test]
    async fn server_lifecycle() {
        let log = Arc::new(MemoryMutationLog::with_id(1));
        log.record(TreePath::parse("/a").unwrap(), EventName::Value, json!(1));

        let server = SyncServer::start(
            ServerConfig::new("mydb"),
            log,
            Arc::new(GrantRules::default()),
        )
        .await
        .unwrap();
        assert_eq!(server.db_name(), "mydb");
        assert_eq!(server.role(), ClusterRole::Standalone);

        let response = server
            .handle(Some(&Identity::Admin), &MutationsRequest::for_path("/a"))
            .await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let result = SyncServer::start(
            ServerConfig::new("db").with_max_scan_batch(0),
            Arc::new(MemoryMutationLog::new()),
            Arc::new(GrantRules::default()),
        )
        .await;
        assert!(result.is_err());
    }
}
