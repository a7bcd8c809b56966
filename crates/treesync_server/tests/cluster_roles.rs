//! Tests for master/worker deployments of the sync server.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use treesync_cluster::{IpcConfig, RetryConfig};
use treesync_protocol::{EventName, MutationsRequest, TreePath};
use treesync_server::{
    ClusterConfig, ClusterRole, GrantRules, Identity, MemoryMutationLog, ServerConfig, SyncServer,
};

const TOKEN: &str = "integration-token";

fn rules() -> Arc<GrantRules> {
    Arc::new(GrantRules::from_json(r#"{"grants": [{"path": "/", "read": "anyone"}]}"#).unwrap())
}

/// Picks a port nothing listens on yet.
fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn worker_ipc(port: u16) -> IpcConfig {
    IpcConfig::new("127.0.0.1", port, TOKEN)
        .with_worker_id("worker-it")
        .with_retry(RetryConfig::fixed(Duration::from_millis(25)))
        .with_request_timeout(Duration::from_secs(2))
}

async fn start_master(port: u16) -> (Arc<MemoryMutationLog>, SyncServer) {
    let log = Arc::new(MemoryMutationLog::with_id(11));
    log.record(TreePath::parse("/chat/1").unwrap(), EventName::Value, json!("hi"));
    let config = ServerConfig::new("app")
        .with_cluster(ClusterConfig::master(IpcConfig::new("127.0.0.1", port, TOKEN)));
    let server = SyncServer::start(config, log.clone(), rules()).await.unwrap();
    (log, server)
}

async fn start_worker(port: u16) -> SyncServer {
    let config = ServerConfig::new("app").with_cluster(ClusterConfig::worker(worker_ipc(port)));
    SyncServer::start(config, Arc::new(MemoryMutationLog::new()), rules())
        .await
        .unwrap()
}

#[tokio::test]
async fn worker_serves_master_log() {
    let (log, master) = start_master(0).await;
    assert_eq!(master.role(), ClusterRole::Master);
    let port = master.coordinator().ipc_addr().unwrap().port();

    let worker = start_worker(port).await;
    assert!(worker.coordinator().wait_ready(Duration::from_secs(5)).await);

    let request = MutationsRequest::for_path("/chat/1");
    let via_worker = worker.handle(Some(&Identity::Anonymous), &request).await;
    let via_master = master.handle(Some(&Identity::Anonymous), &request).await;
    assert_eq!(via_worker.status, 200);
    assert_eq!(via_worker.body, via_master.body);

    // Cursors issued through the worker resume on the master and vice versa.
    log.record(TreePath::parse("/chat/1").unwrap(), EventName::Value, json!("again"));
    let context: serde_json::Value =
        serde_json::from_str(via_worker.header("TreeSync-Context").unwrap()).unwrap();
    let resume = MutationsRequest::for_path("/chat/1")
        .with_cursor(context["cursor"].as_str().unwrap());
    let response = master.handle(Some(&Identity::Anonymous), &resume).await;
    assert_eq!(response.body[0]["value"], "again");
}

#[tokio::test]
async fn worker_errors_keep_their_kind() {
    let (_log, master) = start_master(0).await;
    let port = master.coordinator().ipc_addr().unwrap().port();
    let worker = start_worker(port).await;
    assert!(worker.coordinator().wait_ready(Duration::from_secs(5)).await);

    let request = MutationsRequest::for_path("/chat").with_cursor("00");
    let response = worker.handle(Some(&Identity::Anonymous), &request).await;
    assert_eq!(response.status, 400);
    assert_eq!(response.body["code"], "invalid_cursor");
}

#[tokio::test]
async fn worker_recovers_when_master_appears() {
    let port = free_port();
    let worker = start_worker(port).await;
    let request = MutationsRequest::for_path("/chat/1");

    let response = worker.handle(Some(&Identity::Anonymous), &request).await;
    assert_eq!(response.status, 503);
    assert_eq!(response.body["code"], "upstream_unavailable");

    let (_log, _master) = start_master(port).await;
    assert!(worker.coordinator().wait_ready(Duration::from_secs(5)).await);

    let response = worker.handle(Some(&Identity::Anonymous), &request).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body[0]["value"], "hi");
}

#[tokio::test]
async fn worker_validates_before_forwarding() {
    // No master at all: request errors must not depend on connectivity.
    let worker = start_worker(free_port()).await;

    let response = worker
        .handle(Some(&Identity::Anonymous), &MutationsRequest::default())
        .await;
    assert_eq!(response.body["code"], "invalid_request");

    let response = worker
        .handle(None, &MutationsRequest::for_path("/chat"))
        .await;
    assert_eq!(response.body["code"], "not_authorized");
}
