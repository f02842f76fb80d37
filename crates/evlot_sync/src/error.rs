//! Error types for the sync store.

use evlot_model::{DocKey, ModelError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// A write that lost against the remote store.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("conflict on {key}: {reason}")]
pub struct ConflictError {
    /// Document the write targeted.
    pub key: DocKey,
    /// What the remote store reported.
    pub reason: String,
}

impl ConflictError {
    /// Creates a conflict error.
    pub fn new(key: DocKey, reason: impl Into<String>) -> Self {
        Self {
            key,
            reason: reason.into(),
        }
    }
}

/// Authentication failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The token could not be decoded.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// The signature does not match.
    #[error("invalid token signature")]
    BadSignature,

    /// The token has expired.
    #[error("token expired")]
    Expired,

    /// The token belongs to someone else.
    #[error("token issued to {token_user} used by {claimed}")]
    UserMismatch {
        /// User the token was issued to.
        token_user: String,
        /// User the request claimed to be.
        claimed: String,
    },

    /// The user id cannot be put in a token.
    #[error("invalid user id: {0}")]
    InvalidUser(String),
}

/// Errors that can occur in sync store operations.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// The write lost against a remote change and must be re-fetched.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// Missing, invalid or expired credentials.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// A conditional create found an existing document.
    #[error("document {key} already exists")]
    AlreadyExists {
        /// Key of the existing document.
        key: DocKey,
    },

    /// The document does not exist.
    #[error("document {key} not found")]
    NotFound {
        /// Key that was looked up.
        key: DocKey,
    },

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote did not answer in time.
    #[error("operation timed out")]
    Timeout,

    /// The sync pass was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// A sync pass is already running.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// The store was closed by logout.
    #[error("sync store is closed")]
    Closed,

    /// Document failed decoding or validation.
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            _ => false,
        }
    }
}
