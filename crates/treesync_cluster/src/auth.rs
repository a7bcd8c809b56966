//! Mutual authentication for the master/worker channel.
//!
//! Both sides share a secret token. The worker proves knowledge of it in its
//! `Hello`; the master proves it back by signing the worker's nonce.
//!
//! The master remembers every accepted nonce until the `Hello` carrying it
//! falls outside the skew window, so a captured `Hello` cannot be replayed.
//!
//! ## MAC Inputs
//!
//! Hello:
//! - label `treesync-worker`
//! - 4 bytes: worker id length (big-endian), then the worker id
//! - 16 bytes: nonce
//! - 8 bytes: timestamp (Unix millis, big-endian)
//!
//! Welcome:
//! - label `treesync-master`
//! - 16 bytes: the worker's nonce

use crate::error::{IpcError, IpcResult};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use rand::RngCore;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use treesync_protocol::{Hello, Welcome, IPC_PROTOCOL_VERSION};

type HmacSha256 = Hmac<Sha256>;

/// Length of the handshake nonce.
pub const NONCE_LEN: usize = 16;

/// Upper bound on nonces remembered at once.
pub const MAX_TRACKED_NONCES: usize = 4096;

const WORKER_LABEL: &[u8] = b"treesync-worker";
const MASTER_LABEL: &[u8] = b"treesync-master";

/// Signs and verifies handshake messages.
///
/// Clones share the set of accepted nonces.
#[derive(Clone)]
pub struct IpcAuth {
    secret: Vec<u8>,
    max_skew: Duration,
    // nonce -> time (Unix millis) after which its Hello is stale anyway
    seen: Arc<Mutex<HashMap<Vec<u8>, u64>>>,
}

impl IpcAuth {
    /// Creates an authenticator from the shared token.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            max_skew: Duration::from_secs(30),
            seen: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Sets the largest accepted clock difference.
    pub fn with_max_skew(mut self, max_skew: Duration) -> Self {
        self.max_skew = max_skew;
        self
    }

    /// Builds a signed `Hello` with a fresh nonce.
    pub fn create_hello(&self, worker_id: &str) -> IpcResult<Hello> {
        let mut nonce = vec![0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let timestamp_ms = now_millis();
        let mac = self.sign(&hello_payload(worker_id, &nonce, timestamp_ms))?;

        Ok(Hello {
            protocol_version: IPC_PROTOCOL_VERSION,
            worker_id: worker_id.to_string(),
            nonce,
            timestamp_ms,
            mac,
        })
    }

    /// Verifies a worker's `Hello`.
    ///
    /// Each nonce is accepted once.
    pub fn verify_hello(&self, hello: &Hello) -> IpcResult<()> {
        if hello.protocol_version != IPC_PROTOCOL_VERSION {
            return Err(IpcError::Authentication(format!(
                "unsupported protocol version: {}",
                hello.protocol_version
            )));
        }
        if hello.nonce.len() != NONCE_LEN {
            return Err(IpcError::Authentication("invalid nonce length".into()));
        }

        let payload = hello_payload(&hello.worker_id, &hello.nonce, hello.timestamp_ms);
        self.verify(&payload, &hello.mac)?;

        let now = now_millis();
        let skew = now.abs_diff(hello.timestamp_ms);
        if u128::from(skew) > self.max_skew.as_millis() {
            return Err(IpcError::Authentication("clock skew too large".into()));
        }
        self.remember_nonce(hello, now)
    }

    fn remember_nonce(&self, hello: &Hello, now: u64) -> IpcResult<()> {
        let window = u64::try_from(self.max_skew.as_millis()).unwrap_or(u64::MAX);
        let mut seen = self.seen.lock();
        seen.retain(|_, stale_after| *stale_after >= now);

        if seen.contains_key(&hello.nonce) {
            return Err(IpcError::Authentication("replayed hello".into()));
        }
        if seen.len() >= MAX_TRACKED_NONCES {
            return Err(IpcError::Authentication("too many handshakes in progress".into()));
        }
        seen.insert(
            hello.nonce.clone(),
            hello.timestamp_ms.saturating_add(window),
        );
        Ok(())
    }

    /// Builds the master's `Welcome` for an accepted `Hello`.
    pub fn create_welcome(&self, hello: &Hello) -> IpcResult<Welcome> {
        Ok(Welcome {
            protocol_version: IPC_PROTOCOL_VERSION,
            mac: self.sign(&welcome_payload(&hello.nonce))?,
        })
    }

    /// Verifies the master's `Welcome` against the `Hello` we sent.
    pub fn verify_welcome(&self, hello: &Hello, welcome: &Welcome) -> IpcResult<()> {
        if welcome.protocol_version != IPC_PROTOCOL_VERSION {
            return Err(IpcError::Authentication(format!(
                "unsupported protocol version: {}",
                welcome.protocol_version
            )));
        }
        self.verify(&welcome_payload(&hello.nonce), &welcome.mac)
    }

    fn keyed(&self) -> IpcResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| IpcError::Config("invalid IPC token".into()))
    }

    fn sign(&self, data: &[u8]) -> IpcResult<Vec<u8>> {
        let mut mac = self.keyed()?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn verify(&self, data: &[u8], signature: &[u8]) -> IpcResult<()> {
        let mut mac = self.keyed()?;
        mac.update(data);
        mac.verify_slice(signature)
            .map_err(|_| IpcError::Authentication("invalid signature".into()))
    }
}

impl std::fmt::Debug for IpcAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcAuth")
            .field("secret", &"<redacted>")
            .field("max_skew", &self.max_skew)
            .finish()
    }
}

fn hello_payload(worker_id: &str, nonce: &[u8], timestamp_ms: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(WORKER_LABEL.len() + 4 + worker_id.len() + nonce.len() + 8);
    data.extend_from_slice(WORKER_LABEL);
    data.extend_from_slice(&(worker_id.len() as u32).to_be_bytes());
    data.extend_from_slice(worker_id.as_bytes());
    data.extend_from_slice(nonce);
    data.extend_from_slice(&timestamp_ms.to_be_bytes());
    data
}

fn welcome_payload(nonce: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(MASTER_LABEL.len() + nonce.len());
    data.extend_from_slice(MASTER_LABEL);
    data.extend_from_slice(nonce);
    data
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
