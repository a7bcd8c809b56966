//! The mutations sync endpoint.

use crate::access::AccessFilter;
use crate::config::ServerConfig;
use crate::coordinator::ClusterCoordinator;
use crate::error::{ServerError, ServerResult};
use crate::rules::Identity;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};
use treesync_protocol::{MutationBatch, MutationQuery, MutationsRequest, TargetParser};

/// Response header carrying the resume cursor.
pub const CONTEXT_HEADER: &str = "TreeSync-Context";

/// Transport-neutral response of the endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointResponse {
    /// HTTP status code.
    pub status: u16,
    /// Extra response headers.
    pub headers: Vec<(String, String)>,
    /// JSON body.
    pub body: serde_json::Value,
}

impl EndpointResponse {
    fn success(batch: MutationBatch) -> Self {
        let context = json!({ "cursor": batch.cursor, "has_more": batch.has_more });
        Self {
            status: 200,
            headers: vec![(CONTEXT_HEADER.to_string(), context.to_string())],
            body: serde_json::to_value(&batch.records).unwrap_or_else(|_| json!([])),
        }
    }

    fn failure(err: &ServerError) -> Self {
        let kind = err.kind();
        Self {
            status: kind.http_status(),
            headers: Vec::new(),
            body: json!({ "code": kind.code(), "message": err.public_message() }),
        }
    }

    /// Returns the value of a header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Serves `GET /sync/mutations/{db}` requests.
#[derive(Debug, Clone)]
pub struct SyncEndpoint {
    config: Arc<ServerConfig>,
    access: AccessFilter,
    coordinator: Arc<ClusterCoordinator>,
}

impl SyncEndpoint {
    /// Creates an endpoint.
    pub fn new(
        config: Arc<ServerConfig>,
        access: AccessFilter,
        coordinator: Arc<ClusterCoordinator>,
    ) -> Self {
        Self {
            config,
            access,
            coordinator,
        }
    }

    /// Handles a request and frames the outcome.
    pub async fn handle(
        &self,
        identity: Option<&Identity>,
        request: &MutationsRequest,
    ) -> EndpointResponse {
        match self.execute(identity, request).await {
            Ok(batch) => EndpointResponse::success(batch),
            Err(err) => {
                if err.is_server_error() {
                    error!(error = %err, "mutations request failed");
                } else {
                    debug!(error = %err, "mutations request rejected");
                }
                EndpointResponse::failure(&err)
            }
        }
    }

    /// Answers a request whose parameters could not be decoded.
    ///
    /// Disabled logging still takes precedence over the decode failure.
    pub fn reject_malformed(&self, detail: &str) -> EndpointResponse {
        let err = match self.ensure_logging() {
            Err(err) => err,
            Ok(()) => ServerError::InvalidRequest(detail.to_string()),
        };
        debug!(error = %err, "mutations request rejected");
        EndpointResponse::failure(&err)
    }

    /// Runs the request pipeline without framing.
    ///
    /// Validation and authorization happen before any log access.
    pub async fn execute(
        &self,
        identity: Option<&Identity>,
        request: &MutationsRequest,
    ) -> ServerResult<MutationBatch> {
        self.ensure_logging()?;
        let identity = identity
            .ok_or_else(|| ServerError::NotAuthorized("request has no identity".into()))?;

        let parsed = TargetParser::parse(request)?;
        let authorized = self.access.filter(identity, parsed.targets)?;
        if authorized.is_empty() {
            return Err(ServerError::NotAuthorized(
                "no access to any requested target".into(),
            ));
        }

        let query = MutationQuery::new(authorized.into_targets(), parsed.start);
        self.coordinator.query(query).await
    }

    fn ensure_logging(&self) -> ServerResult<()> {
        if self.config.transactions.enabled {
            Ok(())
        } else {
            Err(ServerError::NoTransactionLogging)
        }
    }
}
