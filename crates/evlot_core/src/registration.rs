//! Waiting-list registration and QR check-in.

use crate::error::{LotteryError, LotteryResult};
use evlot_model::{
    DocKey, Entrant, EntrantId, EntrantStatus, EventId, LocationSample, QrPayload, Timestamp,
};
use evlot_sync::SyncStore;
use tracing::{debug, info};

/// Result of [`register`].
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    /// A new entrant was added to the waiting list.
    Joined(Entrant),
    /// The user was already registered.
    AlreadyRegistered(Entrant),
}

impl Registration {
    /// The entrant either way.
    pub fn entrant(&self) -> &Entrant {
        match self {
            Registration::Joined(entrant) | Registration::AlreadyRegistered(entrant) => entrant,
        }
    }
}

/// Result of [`check_in`].
#[derive(Debug, Clone, PartialEq)]
pub enum CheckInOutcome {
    /// The entrant is now checked in.
    CheckedIn(Entrant),
    /// The entrant had checked in before; nothing changed.
    AlreadyCheckedIn(Entrant),
}

impl CheckInOutcome {
    /// The entrant either way.
    pub fn entrant(&self) -> &Entrant {
        match self {
            CheckInOutcome::CheckedIn(entrant) | CheckInOutcome::AlreadyCheckedIn(entrant) => {
                entrant
            }
        }
    }
}

/// Registers the session user for an event's waiting list.
///
/// Registering twice returns the existing entrant. Fails with
/// [`LotteryError::RegistrationClosed`] outside the registration window and
/// [`LotteryError::WaitlistFull`] when the event's limit is reached.
pub fn register(
    store: &SyncStore,
    event_id: EventId,
    display_name: &str,
    email: Option<&str>,
) -> LotteryResult<Registration> {
    let user_id = store.user_id()?;
    let event = store
        .event(event_id)?
        .ok_or(LotteryError::EventNotFound(event_id))?;
    let entrants = store.entrants_of(event_id)?;

    if let Some(existing) = entrants.iter().find(|e| e.user_id == user_id) {
        debug!(event = %event_id, user = %user_id, "already registered");
        return Ok(Registration::AlreadyRegistered(existing.clone()));
    }

    let now = store.now();
    if !event.is_registration_open(now) {
        return Err(LotteryError::RegistrationClosed { event_id });
    }
    if let Some(limit) = event.effective_waitlist_limit() {
        if entrants.len() >= limit as usize {
            return Err(LotteryError::WaitlistFull { event_id, limit });
        }
    }

    let mut entrant = Entrant::new(event_id, user_id, display_name, now);
    if let Some(email) = email {
        entrant = entrant.with_email(email);
    }
    store.upsert(entrant.clone())?;
    info!(event = %event_id, entrant = %entrant.id, "joined waiting list");
    Ok(Registration::Joined(entrant))
}

/// Takes the session user off an event's waiting list.
///
/// Only an entrant that has not checked in can leave; the entrant document
/// is deleted and the deletion syncs like any other write.
pub fn leave(store: &SyncStore, event_id: EventId) -> LotteryResult<Entrant> {
    let user_id = store.user_id()?;
    let entrant = store
        .entrants_of(event_id)?
        .into_iter()
        .find(|e| e.user_id == user_id)
        .ok_or(LotteryError::NotRegistered(event_id))?;
    if entrant.status != EntrantStatus::Registered {
        return Err(LotteryError::CannotLeave {
            entrant_id: entrant.id,
            status: entrant.status,
        });
    }
    store.delete(DocKey::entrant(entrant.id))?;
    info!(event = %event_id, entrant = %entrant.id, "left waiting list");
    Ok(entrant)
}

/// Checks an entrant in from a scanned QR payload.
///
/// Scanning an entrant that is already checked in (or further along) is a
/// no-op.
pub fn check_in(
    store: &SyncStore,
    payload: &QrPayload,
    sample: Option<LocationSample>,
) -> LotteryResult<CheckInOutcome> {
    let mut entrant = store
        .entrant(payload.entrant_id)?
        .ok_or(LotteryError::EntrantNotFound(payload.entrant_id))?;
    if entrant.event_id != payload.event_id {
        return Err(LotteryError::EventMismatch {
            entrant_id: entrant.id,
            event_id: payload.event_id,
        });
    }
    if entrant.status != EntrantStatus::Registered {
        debug!(entrant = %entrant.id, status = %entrant.status, "repeat check-in ignored");
        return Ok(CheckInOutcome::AlreadyCheckedIn(entrant));
    }

    let now: Timestamp = store.now();
    entrant.check_in(now, sample)?;
    store.upsert(entrant.clone())?;
    info!(event = %entrant.event_id, entrant = %entrant.id, "checked in");
    Ok(CheckInOutcome::CheckedIn(entrant))
}

/// Turns result notifications on or off for an entrant.
pub fn set_notifications(
    store: &SyncStore,
    entrant_id: EntrantId,
    enabled: bool,
) -> LotteryResult<Entrant> {
    let mut entrant = store
        .entrant(entrant_id)?
        .ok_or(LotteryError::EntrantNotFound(entrant_id))?;
    if entrant.notifications_enabled != enabled {
        entrant.notifications_enabled = enabled;
        store.upsert(entrant.clone())?;
    }
    Ok(entrant)
}
