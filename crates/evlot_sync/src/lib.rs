//! # EVLOT Sync
//!
//! Session-scoped document cache for the lottery coordinator.
//!
//! This crate provides:
//! - `SyncStore`, a local cache of events, entrants, draw records and
//!   notification records kept in step with a remote store
//! - Field-level last-writer-wins merging with server timestamps
//! - A change feed with pull subscriptions and callbacks
//! - Conditional creates for records that must be written once
//! - HMAC session tokens
//! - `MemoryRemote`, an in-process remote with fault injection
//!
//! ## Sync model
//!
//! Writes land in the cache at once and are queued in an oplog. A sync
//! pass pulls first, merging each remote version field by field, then
//! pushes the queue. The remote assigns strictly increasing server times;
//! on equal times the server copy wins.
//!
//! ## Key Invariants
//!
//! - A document deleted remotely is never resurrected by a local write
//! - Draw records are created once and never change
//! - Subscribers see changes in emission order
//! - Nothing is readable after `close`

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod change_feed;
mod config;
mod error;
mod merge;
mod oplog;
mod remote;
mod store;

pub use auth::{AuthConfig, AuthToken, Session, TokenIssuer, TokenValidator};
pub use change_feed::{
    Change, ChangeCallback, ChangeFeed, ChangeKind, ChangeSource, Predicate, Subscription,
    SubscriptionId,
};
pub use config::{RetryConfig, SyncConfig};
pub use error::{AuthError, ConflictError, SyncError, SyncResult};
pub use merge::{merge_fields, FieldStamp, Merged, StampMap, StampOrigin};
pub use oplog::{Oplog, PendingMutation};
pub use remote::{MemoryRemote, Mutation, MutationOp, PullBatch, PushAck, RemoteRecord, RemoteStore};
pub use store::{SyncReport, SyncState, SyncStats, SyncStore};
