//! Master side of the IPC channel.

use crate::auth::IpcAuth;
use crate::config::IpcConfig;
use crate::error::{IpcError, IpcResult};
use crate::frame::{encode_frame, read_frame, write_frame, write_payload};
use crate::tls::{self, BoxedStream};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};
use treesync_protocol::{ErrorKind, IpcMessage, MutationBatch, MutationQuery, RemoteError};

/// Answers queries forwarded by workers.
///
/// Implementations run on the blocking thread pool, so they may perform
/// synchronous log reads.
pub trait QueryHandler: Send + Sync + 'static {
    /// Executes a forwarded query.
    fn handle(&self, query: MutationQuery) -> Result<MutationBatch, RemoteError>;
}

/// Accepts worker connections and serves their queries.
///
/// Dropping the listener stops accepting and closes every worker connection.
pub struct MasterListener {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl MasterListener {
    /// Binds the configured address and starts serving.
    pub async fn bind(config: IpcConfig, handler: Arc<dyn QueryHandler>) -> IpcResult<Self> {
        config.validate()?;
        let acceptor = config.tls.as_ref().map(tls::acceptor).transpose()?;
        let listener = TcpListener::bind(config.address()).await?;
        let local_addr = listener.local_addr()?;

        let auth = IpcAuth::new(config.token.as_bytes()).with_max_skew(config.handshake_skew);
        info!(%local_addr, tls = acceptor.is_some(), "IPC master listening");

        let task = tokio::spawn(accept_loop(
            listener,
            acceptor,
            auth,
            handler,
            config.handshake_timeout,
        ));
        Ok(Self { local_addr, task })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the listener and closes all worker connections.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for MasterListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    auth: IpcAuth,
    handler: Arc<dyn QueryHandler>,
    handshake_timeout: Duration,
) {
    let mut connections = JoinSet::new();
    loop {
        let (tcp, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "IPC accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        while connections.try_join_next().is_some() {}

        let acceptor = acceptor.clone();
        let auth = auth.clone();
        let handler = Arc::clone(&handler);
        connections.spawn(async move {
            if let Err(e) = serve_connection(tcp, acceptor, auth, handler, handshake_timeout).await {
                debug!(%peer, error = %e, "IPC connection closed with error");
            }
        });
    }
}

async fn serve_connection(
    tcp: TcpStream,
    acceptor: Option<TlsAcceptor>,
    auth: IpcAuth,
    handler: Arc<dyn QueryHandler>,
    handshake_timeout: Duration,
) -> IpcResult<()> {
    tcp.set_nodelay(true)?;
    let stream = tokio::time::timeout(handshake_timeout, accept_worker(tcp, acceptor, &auth))
        .await
        .map_err(|_| IpcError::Timeout)??;
    let Some((stream, worker_id)) = stream else {
        return Ok(());
    };
    info!(worker = %worker_id, "IPC worker connected");

    let (mut reader, mut writer) = tokio::io::split(stream);
    let (outbound, mut rx) = mpsc::channel::<Vec<u8>>(256);
    let mut writer_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if let Err(e) = write_payload(&mut writer, &payload).await {
                debug!(error = %e, "IPC write failed");
                break;
            }
        }
    });

    // Ids of queries whose reply is still wanted.
    let in_flight = Arc::new(Mutex::new(HashSet::<u64>::new()));
    let result = loop {
        // A dead writer closes the connection so the worker reconnects.
        let frame = tokio::select! {
            frame = read_frame(&mut reader) => frame,
            _ = &mut writer_task => break Err(IpcError::ConnectionLost),
        };
        let message = match frame {
            Ok(Some(message)) => message,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };

        match message {
            IpcMessage::Query { request_id, query } => {
                in_flight.lock().insert(request_id);
                spawn_query(
                    request_id,
                    query,
                    Arc::clone(&handler),
                    outbound.clone(),
                    Arc::clone(&in_flight),
                );
            }
            IpcMessage::Cancel { request_id } => {
                if in_flight.lock().remove(&request_id) {
                    debug!(request_id, "query cancelled by worker");
                }
            }
            other => {
                break Err(IpcError::Protocol(format!(
                    "unexpected {} message from worker",
                    other.type_name()
                )));
            }
        }
    };

    writer_task.abort();
    info!(worker = %worker_id, "IPC worker disconnected");
    result
}

/// Runs the TLS and authentication handshake.
///
/// Returns `None` if the peer hung up before saying hello.
async fn accept_worker(
    tcp: TcpStream,
    acceptor: Option<TlsAcceptor>,
    auth: &IpcAuth,
) -> IpcResult<Option<(BoxedStream, String)>> {
    let mut stream: BoxedStream = match acceptor {
        Some(acceptor) => Box::new(acceptor.accept(tcp).await?),
        None => Box::new(tcp),
    };

    let hello = match read_frame(&mut stream).await? {
        Some(IpcMessage::Hello(hello)) => hello,
        Some(other) => {
            return Err(IpcError::Protocol(format!(
                "expected hello, got {}",
                other.type_name()
            )))
        }
        None => return Ok(None),
    };

    if let Err(e) = auth.verify_hello(&hello) {
        warn!(worker = %hello.worker_id, error = %e, "rejected IPC worker");
        let rejected = IpcMessage::Rejected {
            reason: "authentication failed".into(),
        };
        write_frame(&mut stream, &rejected).await?;
        return Err(e);
    }

    let welcome = auth.create_welcome(&hello)?;
    write_frame(&mut stream, &IpcMessage::Welcome(welcome)).await?;
    Ok(Some((stream, hello.worker_id)))
}

fn spawn_query(
    request_id: u64,
    query: MutationQuery,
    handler: Arc<dyn QueryHandler>,
    outbound: mpsc::Sender<Vec<u8>>,
    in_flight: Arc<Mutex<HashSet<u64>>>,
) {
    tokio::spawn(async move {
        let outcome = match tokio::task::spawn_blocking(move || handler.handle(query)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(request_id, error = %e, "forwarded query panicked");
                Err(RemoteError::new(
                    ErrorKind::Unexpected,
                    "an unexpected error occurred",
                ))
            }
        };

        if !in_flight.lock().remove(&request_id) {
            debug!(request_id, "discarding reply for cancelled query");
            return;
        }
        let payload = match encode_reply(request_id, outcome) {
            Ok(payload) => payload,
            Err(e) => {
                error!(request_id, error = %e, "cannot encode reply");
                return;
            }
        };
        if outbound.send(payload).await.is_err() {
            debug!(request_id, "connection closed before reply was sent");
        }
    });
}

/// Encodes a reply, replacing one that does not fit in a frame with an error.
fn encode_reply(
    request_id: u64,
    outcome: Result<MutationBatch, RemoteError>,
) -> IpcResult<Vec<u8>> {
    match encode_frame(&IpcMessage::Reply { request_id, outcome }) {
        Err(IpcError::FrameTooLarge(len)) => {
            warn!(request_id, len, "reply exceeds the frame limit");
            let outcome = Err(RemoteError::new(
                ErrorKind::Unexpected,
                "reply too large, lower the scan batch size",
            ));
            encode_frame(&IpcMessage::Reply { request_id, outcome })
        }
        other => other,
    }
}
