//! Configuration for the master/worker channel.

use crate::error::{IpcError, IpcResult};
use rand::Rng;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration of the IPC endpoint.
///
/// On the master this is the address to bind; on a worker it is the
/// master's address.
#[derive(Clone)]
pub struct IpcConfig {
    /// Host name or IP address.
    pub host: String,
    /// TCP port (0 lets the master pick one).
    pub port: u16,
    /// Shared secret used for mutual authentication.
    pub token: String,
    /// Transport security, if enabled.
    pub tls: Option<TlsConfig>,
    /// Identifier this worker announces to the master.
    pub worker_id: String,
    /// Upper bound for a forwarded query.
    pub request_timeout: Duration,
    /// Upper bound for the connect + handshake exchange.
    pub handshake_timeout: Duration,
    /// Largest clock difference accepted during the handshake.
    pub handshake_skew: Duration,
    /// Reconnect backoff.
    pub retry: RetryConfig,
}

impl IpcConfig {
    /// Creates a new IPC configuration.
    pub fn new(host: impl Into<String>, port: u16, token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            token: token.into(),
            tls: None,
            worker_id: format!("worker-{}", std::process::id()),
            request_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            handshake_skew: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }

    /// Enables TLS.
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Sets the worker identifier.
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    /// Sets the forwarded query timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the reconnect backoff.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Returns `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Checks the configuration for obvious mistakes.
    pub fn validate(&self) -> IpcResult<()> {
        if self.host.trim().is_empty() {
            return Err(IpcError::Config("IPC host is required".into()));
        }
        if self.token.is_empty() {
            return Err(IpcError::Config("IPC token is required".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(IpcError::Config("request timeout must be positive".into()));
        }
        Ok(())
    }
}

// The token never appears in logs.
impl std::fmt::Debug for IpcConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("token", &"<redacted>")
            .field("tls", &self.tls)
            .field("worker_id", &self.worker_id)
            .field("request_timeout", &self.request_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("handshake_skew", &self.handshake_skew)
            .field("retry", &self.retry)
            .finish()
    }
}

/// TLS material.
///
/// The master needs `cert_path` and `key_path`; a worker needs `ca_path`
/// (the certificate authority that signed the master's certificate).
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// PEM certificate chain presented by the master.
    pub cert_path: Option<PathBuf>,
    /// PEM private key of the master.
    pub key_path: Option<PathBuf>,
    /// PEM root certificates trusted by workers.
    pub ca_path: Option<PathBuf>,
    /// Name to verify the master's certificate against (defaults to the host).
    pub server_name: Option<String>,
}

impl TlsConfig {
    /// Creates a master-side TLS configuration.
    pub fn server(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: Some(cert_path.into()),
            key_path: Some(key_path.into()),
            ..Default::default()
        }
    }

    /// Creates a worker-side TLS configuration.
    pub fn client(ca_path: impl Into<PathBuf>) -> Self {
        Self {
            ca_path: Some(ca_path.into()),
            ..Default::default()
        }
    }

    /// Overrides the verified server name.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// Configuration for reconnect backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Retries at a fixed interval without jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% jitter
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(30))
    }
}
