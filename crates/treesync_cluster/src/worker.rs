//! Worker side of the IPC channel.

use crate::auth::IpcAuth;
use crate::config::IpcConfig;
use crate::error::{IpcError, IpcResult};
use crate::frame::{read_frame, write_frame};
use crate::tls::{self, BoxedStream};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};
use treesync_protocol::{IpcMessage, MutationBatch, MutationQuery, RemoteError};

type Outcome = Result<MutationBatch, RemoteError>;

enum LinkState {
    Disconnected,
    Connected { outbound: mpsc::Sender<IpcMessage> },
}

struct Shared {
    config: IpcConfig,
    auth: IpcAuth,
    connector: Option<TlsConnector>,
    state: RwLock<LinkState>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Outcome>>>,
    next_request_id: AtomicU64,
    connected: watch::Sender<bool>,
}

impl Shared {
    fn outbound(&self) -> Option<mpsc::Sender<IpcMessage>> {
        match &*self.state.read() {
            LinkState::Connected { outbound } => Some(outbound.clone()),
            LinkState::Disconnected => None,
        }
    }

    fn set_connected(&self, outbound: mpsc::Sender<IpcMessage>) {
        *self.state.write() = LinkState::Connected { outbound };
        self.connected.send_replace(true);
    }

    fn set_disconnected(&self) {
        *self.state.write() = LinkState::Disconnected;
        self.connected.send_replace(false);
        // Dropping the senders wakes every waiter with ConnectionLost.
        self.pending.lock().clear();
    }
}

/// A worker's connection to the master.
///
/// The link connects in the background and reconnects with backoff whenever
/// the connection drops. Queries issued while disconnected fail immediately.
pub struct WorkerLink {
    shared: Arc<Shared>,
    supervisor: JoinHandle<()>,
}

impl WorkerLink {
    /// Starts connecting to the master described by `config`.
    pub fn spawn(config: IpcConfig) -> IpcResult<Self> {
        config.validate()?;
        let connector = config.tls.as_ref().map(tls::connector).transpose()?;
        let auth = IpcAuth::new(config.token.as_bytes()).with_max_skew(config.handshake_skew);
        let (connected, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            config,
            auth,
            connector,
            state: RwLock::new(LinkState::Disconnected),
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            connected,
        });

        let supervisor = tokio::spawn(supervise(Arc::clone(&shared)));
        Ok(Self { shared, supervisor })
    }

    /// Returns true while the link is authenticated and usable.
    pub fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    /// Waits until the link is connected, up to `timeout`.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut rx = self.shared.connected.subscribe();
        let connected = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|connected| *connected)).await,
            Ok(Ok(_))
        );
        connected
    }

    /// Forwards a query to the master and waits for its reply.
    ///
    /// Queueing the query and waiting for the reply share one deadline.
    ///
    /// # Errors
    ///
    /// - `NotConnected` if the link is down
    /// - `Timeout` if the query is not sent and answered within the request timeout
    /// - `ConnectionLost` if the connection drops while waiting
    /// - `Remote` if the master answered with an error
    pub async fn forward(&self, query: MutationQuery) -> IpcResult<MutationBatch> {
        let outbound = self.shared.outbound().ok_or(IpcError::NotConnected)?;

        let request_id = self.shared.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(request_id, tx);
        let mut guard = PendingGuard {
            shared: &self.shared,
            outbound: outbound.clone(),
            request_id,
            armed: true,
        };

        let exchange = async {
            outbound
                .send(IpcMessage::Query { request_id, query })
                .await
                .map_err(|_| IpcError::NotConnected)?;
            rx.await.map_err(|_| IpcError::ConnectionLost)
        };

        match tokio::time::timeout(self.shared.config.request_timeout, exchange).await {
            Err(_) => {
                warn!(request_id, "forwarded query timed out");
                Err(IpcError::Timeout)
            }
            Ok(Err(IpcError::ConnectionLost)) => {
                guard.armed = false;
                Err(IpcError::ConnectionLost)
            }
            Ok(Err(e)) => Err(e),
            Ok(Ok(outcome)) => {
                guard.armed = false;
                outcome.map_err(IpcError::Remote)
            }
        }
    }
}

impl Drop for WorkerLink {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

impl std::fmt::Debug for WorkerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLink")
            .field("master", &self.shared.config.address())
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Removes an abandoned request and tells the master to drop it.
struct PendingGuard<'a> {
    shared: &'a Shared,
    outbound: mpsc::Sender<IpcMessage>,
    request_id: u64,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.shared.pending.lock().remove(&self.request_id).is_some() {
            let _ = self.outbound.try_send(IpcMessage::Cancel {
                request_id: self.request_id,
            });
        }
    }
}

async fn supervise(shared: Arc<Shared>) {
    let mut attempt: u32 = 0;
    loop {
        let connect = tokio::time::timeout(shared.config.handshake_timeout, connect(&shared));
        match connect.await {
            Ok(Ok(stream)) => {
                attempt = 0;
                info!(master = %shared.config.address(), "connected to IPC master");
                run_connection(&shared, stream).await;
                warn!(master = %shared.config.address(), "lost connection to IPC master");
            }
            Ok(Err(e)) => {
                debug!(error = %e, "IPC connect failed");
            }
            Err(_) => {
                debug!("IPC handshake timed out");
            }
        }

        attempt = attempt.saturating_add(1);
        tokio::time::sleep(shared.config.retry.delay_for_attempt(attempt)).await;
    }
}

async fn connect(shared: &Shared) -> IpcResult<BoxedStream> {
    let config = &shared.config;
    let tcp = TcpStream::connect(config.address()).await?;
    tcp.set_nodelay(true)?;

    let mut stream: BoxedStream = match (&shared.connector, &config.tls) {
        (Some(connector), Some(tls_config)) => {
            let name = tls::server_name(tls_config, &config.host)?;
            Box::new(connector.connect(name, tcp).await?)
        }
        _ => Box::new(tcp),
    };

    let hello = shared.auth.create_hello(&config.worker_id)?;
    write_frame(&mut stream, &IpcMessage::Hello(hello.clone())).await?;
    match read_frame(&mut stream).await? {
        Some(IpcMessage::Welcome(welcome)) => {
            shared.auth.verify_welcome(&hello, &welcome)?;
            Ok(stream)
        }
        Some(IpcMessage::Rejected { reason }) => Err(IpcError::Authentication(reason)),
        Some(other) => Err(IpcError::Protocol(format!(
            "expected welcome, got {}",
            other.type_name()
        ))),
        None => Err(IpcError::ConnectionLost),
    }
}

async fn run_connection(shared: &Shared, stream: BoxedStream) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (outbound, mut rx) = mpsc::channel::<IpcMessage>(256);
    let writer_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &message).await {
                debug!(error = %e, "IPC write failed");
                break;
            }
        }
    });
    shared.set_connected(outbound);

    loop {
        match read_frame(&mut reader).await {
            Ok(Some(IpcMessage::Reply {
                request_id,
                outcome,
            })) => {
                let waiter = shared.pending.lock().remove(&request_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(outcome);
                    }
                    None => debug!(request_id, "discarding orphaned reply"),
                }
            }
            Ok(Some(other)) => {
                warn!(kind = other.type_name(), "unexpected message from master");
                break;
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "IPC read failed");
                break;
            }
        }
    }

    shared.set_disconnected();
    writer_task.abort();
}
