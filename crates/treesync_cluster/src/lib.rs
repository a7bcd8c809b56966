//! # TreeSync Cluster
//!
//! Master/worker transport for TreeSync.
//!
//! This crate provides:
//! - Length-prefixed CBOR framing over TCP (optionally TLS)
//! - Mutual HMAC-SHA256 authentication with a shared token
//! - `MasterListener`, which serves forwarded queries from workers
//! - `WorkerLink`, which forwards queries to the master and reconnects with
//!   exponential backoff
//!
//! ## Key Invariants
//!
//! - A worker never answers a query itself; it only relays the master's reply
//! - While disconnected, forwarding fails immediately instead of waiting
//! - Every forwarded query is bounded by the request timeout
//! - Queries are retried only by reconnecting, never by re-sending a query

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod config;
mod error;
mod frame;
mod master;
mod tls;
mod worker;

pub use auth::{IpcAuth, NONCE_LEN};
pub use config::{IpcConfig, RetryConfig, TlsConfig};
pub use error::{IpcError, IpcResult};
pub use frame::{encode_frame, read_frame, write_frame, write_payload};
pub use master::{MasterListener, QueryHandler};
pub use tls::{BoxedStream, IpcStream};
pub use worker::WorkerLink;
