//! Serve command implementation.
//!
//! Every setting can also be given through its environment variable
//! (`DBNAME`, `PORT`, `IPC_ROLE`, `TXLOG` and so on).

use crate::error::CliError;
use crate::http;
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use treesync_cluster::{IpcConfig, TlsConfig};
use treesync_server::{
    now_millis, ClusterConfig, ClusterRole, GrantRules, MemoryMutationLog, ServerConfig,
    SyncServer, TransactionLogConfig, DEFAULT_MAX_SCAN_BATCH,
};

/// Role requested through `IPC_ROLE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IpcRole {
    /// Owns the log and serves workers.
    Master,
    /// Forwards queries to the master.
    Worker,
}

/// Arguments of the `serve` command.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Database name served under /sync/mutations/{dbname}
    #[arg(long, env = "DBNAME", default_value = "default")]
    pub dbname: String,

    /// HTTP bind address
    #[arg(long, env = "HOST", default_value = "localhost")]
    pub host: String,

    /// HTTP port
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// IPC port; 0 runs a standalone server
    #[arg(long, env = "IPC_PORT", default_value_t = 0)]
    pub ipc_port: u16,

    /// Cluster role, required when an IPC port is set
    #[arg(long, env = "IPC_ROLE", value_enum)]
    pub ipc_role: Option<IpcRole>,

    /// IPC host: bind address of a master, master address for a worker
    #[arg(long, env = "IPC_HOST", default_value = "localhost")]
    pub ipc_host: String,

    /// Secure the IPC channel with TLS (1/0)
    #[arg(long, env = "IPC_SSL", default_value_t = false, action = ArgAction::Set,
          value_parser = BoolishValueParser::new())]
    pub ipc_ssl: bool,

    /// Shared secret of the master and its workers
    #[arg(long, env = "IPC_TOKEN", hide_env_values = true)]
    pub ipc_token: Option<String>,

    /// PEM certificate chain of the master
    #[arg(long, env = "IPC_CERT")]
    pub ipc_cert: Option<PathBuf>,

    /// PEM private key of the master
    #[arg(long, env = "IPC_KEY")]
    pub ipc_key: Option<PathBuf>,

    /// PEM certificate authority trusted by workers
    #[arg(long, env = "IPC_CA")]
    pub ipc_ca: Option<PathBuf>,

    /// Enable the transaction log (1/0); the feed requires it
    #[arg(long, env = "TXLOG", default_value_t = false, action = ArgAction::Set,
          value_parser = BoolishValueParser::new())]
    pub txlog: bool,

    /// Transaction log retention in days
    #[arg(long, env = "TXDAYS", default_value_t = 30)]
    pub txdays: u64,

    /// JSON grant file; without it only admins are served
    #[arg(long, env = "RULES")]
    pub rules: Option<PathBuf>,

    /// JSON lines file of mutation records loaded at startup
    #[arg(long, env = "SEED")]
    pub seed: Option<PathBuf>,

    /// Stable log id, so cursors survive restarts
    #[arg(long, env = "LOG_ID")]
    pub log_id: Option<u64>,

    /// Maximum records scanned per request
    #[arg(long, default_value_t = DEFAULT_MAX_SCAN_BATCH)]
    pub max_scan_batch: usize,

    /// Seconds between retention passes
    #[arg(long, default_value_t = 3600)]
    pub retention_interval: u64,
}

impl ServeArgs {
    /// Builds the server configuration.
    pub fn server_config(&self) -> Result<ServerConfig, CliError> {
        let transactions = if self.txlog {
            TransactionLogConfig::enabled(self.txdays)
        } else {
            TransactionLogConfig::disabled()
        };
        Ok(ServerConfig::new(self.dbname.clone())
            .with_transactions(transactions)
            .with_max_scan_batch(self.max_scan_batch)
            .with_cluster(self.cluster_config()?))
    }

    fn cluster_config(&self) -> Result<ClusterConfig, CliError> {
        if self.ipc_port == 0 {
            if let Some(role) = self.ipc_role {
                return Err(CliError::Config(format!(
                    "IPC_ROLE={:?} requires IPC_PORT",
                    role
                )));
            }
            return Ok(ClusterConfig::standalone());
        }

        let role = self.ipc_role.ok_or_else(|| {
            CliError::Config("IPC_ROLE must be either \"master\" or \"worker\"".into())
        })?;
        let token = self
            .ipc_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CliError::Config("IPC_TOKEN is required with IPC_PORT".into()))?;

        let mut ipc = IpcConfig::new(self.ipc_host.clone(), self.ipc_port, token);
        if self.ipc_ssl {
            ipc = ipc.with_tls(self.tls_config(role)?);
        }
        Ok(match role {
            IpcRole::Master => ClusterConfig::master(ipc),
            IpcRole::Worker => ClusterConfig::worker(ipc),
        })
    }

    fn tls_config(&self, role: IpcRole) -> Result<TlsConfig, CliError> {
        match role {
            IpcRole::Master => match (&self.ipc_cert, &self.ipc_key) {
                (Some(cert), Some(key)) => Ok(TlsConfig::server(cert, key)),
                _ => Err(CliError::Config(
                    "IPC_SSL on a master requires IPC_CERT and IPC_KEY".into(),
                )),
            },
            IpcRole::Worker => self
                .ipc_ca
                .as_ref()
                .map(|ca| TlsConfig::client(ca))
                .ok_or_else(|| CliError::Config("IPC_SSL on a worker requires IPC_CA".into())),
        }
    }

    /// Creates the in-memory log, loading the seed file if given.
    pub fn open_log(&self) -> Result<MemoryMutationLog, Box<dyn std::error::Error>> {
        let log = match self.log_id {
            Some(id) => MemoryMutationLog::with_id(id),
            None => MemoryMutationLog::new(),
        };
        if let Some(seed) = &self.seed {
            let loaded = log.load_jsonl_file(seed)?;
            info!(records = loaded, file = %seed.display(), "loaded seed records");
        }
        Ok(log)
    }

    /// Loads the grant file.
    pub fn open_rules(&self) -> Result<GrantRules, Box<dyn std::error::Error>> {
        match &self.rules {
            Some(path) => Ok(GrantRules::from_file(path)?),
            None => {
                warn!("no rules file given, only admin requests will be served");
                Ok(GrantRules::default())
            }
        }
    }
}

/// Periodically drops records older than `max_age`.
fn spawn_retention(
    log: Arc<MemoryMutationLog>,
    max_age: Duration,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let removed = log.truncate_older_than(max_age, now_millis());
            debug!(removed, "retention pass finished");
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

/// Runs the serve command until interrupted.
pub async fn run(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.server_config()?;
    let transactions = config.transactions.clone();
    let log = Arc::new(args.open_log()?);
    let rules = Arc::new(args.open_rules()?);

    let server = Arc::new(SyncServer::start(config, log.clone(), rules).await?);
    if let Some(addr) = server.coordinator().ipc_addr() {
        info!(%addr, "accepting workers");
    }

    let retention = (transactions.enabled && server.role() != ClusterRole::Worker).then(|| {
        spawn_retention(
            log,
            transactions.max_age,
            Duration::from_secs(args.retention_interval.max(1)),
        )
    });

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!(
        addr = %listener.local_addr()?,
        db = %server.db_name(),
        role = %server.role(),
        "treesync server running"
    );

    axum::serve(listener, http::router(server))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = retention {
        task.abort();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use treesync_protocol::{EventName, MutationRecord, TreePath};
    use treesync_server::MutationLog;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        serve: ServeArgs,
    }

    fn parse(args: &[&str]) -> ServeArgs {
        let mut argv = vec!["serve"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv).unwrap().serve
    }

    #[tokio::test]
    async fn retention_uses_record_clock() {
        let log = Arc::new(MemoryMutationLog::with_id(1));
        log.append(MutationRecord::new(
            TreePath::parse("/old").unwrap(),
            EventName::Value,
            serde_json::json!(1),
            1,
        ));
        log.record(
            TreePath::parse("/new").unwrap(),
            EventName::Value,
            serde_json::json!(2),
        );

        let task = spawn_retention(
            Arc::clone(&log),
            Duration::from_secs(24 * 60 * 60),
            Duration::from_millis(10),
        );
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while log.len() > 1 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();

        assert_eq!(log.len(), 1);
        let kept = log.read_from(log.retention_floor(), 10).unwrap();
        assert_eq!(kept[0].path.to_string(), "/new");
    }

    #[test]
    fn defaults_run_standalone_without_logging() {
        let args = parse(&["--dbname", "app"]);
        let config = args.server_config().unwrap();
        assert_eq!(config.db_name, "app");
        assert_eq!(config.cluster.role(), ClusterRole::Standalone);
        assert!(!config.transactions.enabled);
    }

    #[test]
    fn txlog_sets_retention() {
        let args = parse(&["--txlog", "1", "--txdays", "2"]);
        let config = args.server_config().unwrap();
        assert!(config.transactions.enabled);
        assert_eq!(config.transactions.max_age, Duration::from_secs(2 * 24 * 3600));
    }

    #[test]
    fn ipc_port_requires_role_and_token() {
        let missing_role = parse(&["--ipc-port", "9163", "--ipc-token", "s3cret"]);
        assert!(matches!(missing_role.server_config(), Err(CliError::Config(_))));

        let missing_token = parse(&["--ipc-port", "9163", "--ipc-role", "worker"]);
        assert!(matches!(missing_token.server_config(), Err(CliError::Config(_))));

        let role_without_port = parse(&["--ipc-role", "master"]);
        assert!(role_without_port.server_config().is_err());
    }

    #[test]
    fn ipc_roles_are_configured() {
        let master = parse(&[
            "--ipc-port", "9163", "--ipc-role", "master", "--ipc-token", "s3cret",
        ]);
        let config = master.server_config().unwrap();
        assert_eq!(config.cluster.role(), ClusterRole::Master);
        assert_eq!(config.cluster.ipc().map(|ipc| ipc.port), Some(9163));

        let worker = parse(&[
            "--ipc-port", "9163", "--ipc-role", "worker", "--ipc-token", "s3cret",
            "--ipc-host", "10.0.0.5",
        ]);
        let config = worker.server_config().unwrap();
        assert_eq!(config.cluster.role(), ClusterRole::Worker);
        assert_eq!(
            config.cluster.ipc().map(|ipc| ipc.host.as_str()),
            Some("10.0.0.5")
        );
    }

    #[test]
    fn tls_needs_key_material() {
        let args = parse(&[
            "--ipc-port", "9163", "--ipc-role", "master", "--ipc-token", "t", "--ipc-ssl", "1",
        ]);
        assert!(args.server_config().is_err());

        let args = parse(&[
            "--ipc-port", "9163", "--ipc-role", "worker", "--ipc-token", "t", "--ipc-ssl",
            "true", "--ipc-ca", "/etc/treesync/ca.pem",
        ]);
        let config = args.server_config().unwrap();
        let tls = config.cluster.ipc().and_then(|ipc| ipc.tls.clone()).unwrap();
        assert_eq!(tls.ca_path, Some(PathBuf::from("/etc/treesync/ca.pem")));
    }

    #[test]
    fn seed_file_is_loaded_with_stable_id() {
        let mut seed = NamedTempFile::new().unwrap();
        writeln!(seed, r#"{{"path": "/a", "event": "value", "value": 1, "timestamp": 10}}"#)
            .unwrap();
        writeln!(seed).unwrap();
        writeln!(seed, r#"{{"path": "/b", "event": "child_added", "timestamp": 20}}"#).unwrap();

        let path = seed.path().to_string_lossy().into_owned();
        let args = parse(&["--seed", &path, "--log-id", "77"]);
        let log = args.open_log().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(treesync_server::MutationLog::log_id(&log), 77);
    }

    #[test]
    fn rules_file_is_optional() {
        let args = parse(&[]);
        assert!(args.open_rules().unwrap().grants().is_empty());

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{"grants": [{"path": "/", "read": "anyone"}]}"#)
            .unwrap();
        let path = file.path().to_string_lossy().into_owned();
        let args = parse(&["--rules", &path]);
        assert_eq!(args.open_rules().unwrap().grants().len(), 1);
    }
}
