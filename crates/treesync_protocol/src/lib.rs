//! # TreeSync Protocol
//!
//! Mutation feed protocol types for TreeSync.
//!
//! This crate provides:
//! - `TreePath` and `EventName` for addressing the data tree
//! - `SubscriptionTarget` and the request `TargetParser`
//! - `MutationRecord`, `MutationQuery` and `MutationBatch`
//! - The opaque resume cursor (`CursorCodec`)
//! - Inter-process messages exchanged between workers and the master
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cursor;
mod error;
mod event;
mod ipc;
mod path;
mod query;
mod record;
mod target;

pub use cursor::{CursorCodec, CursorError, CursorPosition, CURSOR_VERSION, FLAG_PARTIAL};
pub use error::{ErrorKind, ProtocolError, ProtocolResult};
pub use event::{EventClass, EventName};
pub use ipc::{Hello, IpcMessage, RemoteError, Welcome, IPC_PROTOCOL_VERSION, MAX_FRAME_LEN};
pub use path::{TreePath, WILDCARD};
pub use query::{MutationBatch, MutationQuery, QueryStart};
pub use record::MutationRecord;
pub use target::{Delivery, MutationsRequest, ParsedRequest, SubscriptionTarget, TargetParser, TargetSpec};
