//! Error types for lottery operations.

use evlot_model::{EntrantId, EntrantStatus, EventId, ModelError, Timestamp};
use evlot_sync::SyncError;
use thiserror::Error;

/// Result type for lottery operations.
pub type LotteryResult<T> = Result<T, LotteryError>;

/// A draw was attempted for an event that already has results.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("results already exist for event {event_id}")]
pub struct AlreadyDrawnError {
    /// The event.
    pub event_id: EventId,
    /// When the existing draw ran, if the record could be read.
    pub drawn_at: Option<Timestamp>,
}

/// Errors from registration, check-in, draws and invitation handling.
#[derive(Error, Debug, Clone)]
pub enum LotteryError {
    /// The event already has a draw record.
    #[error(transparent)]
    AlreadyDrawn(#[from] AlreadyDrawnError),

    /// No entrant is eligible for the draw.
    #[error("the entrant pool for event {event_id} is empty")]
    EmptyPool {
        /// The event.
        event_id: EventId,
    },

    /// A pool member had not checked in.
    #[error("entrant {entrant_id} is {status}, not checked in")]
    NotCheckedIn {
        /// The entrant.
        entrant_id: EntrantId,
        /// Its current status.
        status: EntrantStatus,
    },

    /// The pool lists an entrant twice.
    #[error("entrant {entrant_id} appears twice in the pool")]
    DuplicateEntrant {
        /// The entrant.
        entrant_id: EntrantId,
    },

    /// The event is not in the store.
    #[error("event {0} not found")]
    EventNotFound(EventId),

    /// The event exists but has not been drawn.
    #[error("event {0} has no draw record")]
    NoDrawRecord(EventId),

    /// The session user has no entrant on the event's waiting list.
    #[error("not registered for event {0}")]
    NotRegistered(EventId),

    /// The entrant has moved past the waiting list.
    #[error("entrant {entrant_id} is {status} and can no longer leave")]
    CannotLeave {
        /// The entrant.
        entrant_id: EntrantId,
        /// Its current status.
        status: EntrantStatus,
    },

    /// A group message without text.
    #[error("message must not be empty")]
    EmptyMessage,

    /// The entrant is not in the store.
    #[error("entrant {0} not found")]
    EntrantNotFound(EntrantId),

    /// Registration is outside the event's window.
    #[error("registration for event {event_id} is closed")]
    RegistrationClosed {
        /// The event.
        event_id: EventId,
    },

    /// The waiting list is at its limit.
    #[error("the waiting list for event {event_id} is full ({limit} entrants)")]
    WaitlistFull {
        /// The event.
        event_id: EventId,
        /// Configured limit.
        limit: u32,
    },

    /// The entrant belongs to a different event.
    #[error("entrant {entrant_id} is not registered for event {event_id}")]
    EventMismatch {
        /// The entrant.
        entrant_id: EntrantId,
        /// The event that was expected.
        event_id: EventId,
    },

    /// Capacity cannot drop below the number already selected.
    #[error("capacity {requested} is below the {selected} entrants already selected")]
    CapacityBelowSelected {
        /// Requested capacity.
        requested: u32,
        /// Entrants holding a place.
        selected: u32,
    },

    /// The entrant cannot answer an invitation.
    #[error("entrant {entrant_id} cannot respond: {reason}")]
    InvalidResponse {
        /// The entrant.
        entrant_id: EntrantId,
        /// Why the answer was refused.
        reason: String,
    },

    /// Writing an export failed.
    #[error("export failed: {0}")]
    Export(String),

    /// The sync store rejected an operation.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// A document failed validation.
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl LotteryError {
    /// Returns true for [`LotteryError::AlreadyDrawn`].
    pub fn is_already_drawn(&self) -> bool {
        matches!(self, LotteryError::AlreadyDrawn(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_drawn_message() {
        let event_id = EventId::from_bytes([7; 16]);
        let err: LotteryError = AlreadyDrawnError {
            event_id,
            drawn_at: None,
        }
        .into();
        assert!(err.is_already_drawn());
        assert_eq!(
            err.to_string(),
            format!("results already exist for event {event_id}")
        );
    }

    #[test]
    fn sync_errors_convert() {
        let err: LotteryError = SyncError::Closed.into();
        assert!(matches!(err, LotteryError::Sync(SyncError::Closed)));
        assert!(!err.is_already_drawn());
    }
}
