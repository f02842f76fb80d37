//! Lottery events.

use crate::error::{ModelError, ModelResult};
use crate::geo::Geofence;
use crate::id::{EventId, UserId};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};

/// A lottery event organizers publish and entrants register for.
///
/// Once `published` is set, every field except `capacity` is frozen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier.
    pub id: EventId,
    /// Display title.
    pub title: String,
    /// Number of winners a draw may select.
    pub capacity: u32,
    /// Region entrants must check in from.
    pub geofence: Geofence,
    /// Registration opens (inclusive).
    pub registration_open: Timestamp,
    /// Registration closes (inclusive).
    pub registration_close: Timestamp,
    /// Organizer who owns the event.
    pub organizer: UserId,
    /// Whether the event has been published.
    #[serde(default)]
    pub published: bool,
    /// Maximum number of registrations; `None` or 0 means unlimited.
    #[serde(default)]
    pub waitlist_limit: Option<u32>,
}

impl Event {
    /// Creates an unpublished event with a fresh id.
    pub fn new(
        title: impl Into<String>,
        capacity: u32,
        geofence: Geofence,
        registration_open: Timestamp,
        registration_close: Timestamp,
        organizer: UserId,
    ) -> Self {
        Self {
            id: EventId::new(),
            title: title.into(),
            capacity,
            geofence,
            registration_open,
            registration_close,
            organizer,
            published: false,
            waitlist_limit: None,
        }
    }

    /// Sets the waiting-list limit.
    pub fn with_waitlist_limit(mut self, limit: u32) -> Self {
        self.waitlist_limit = Some(limit);
        self
    }

    /// Marks the event as published.
    pub fn published(mut self) -> Self {
        self.published = true;
        self
    }

    /// Returns true if `at` lies inside the registration window.
    pub fn is_registration_open(&self, at: Timestamp) -> bool {
        self.registration_open <= at && at <= self.registration_close
    }

    /// Returns true if `at` is after the window closed.
    pub fn is_registration_closed(&self, at: Timestamp) -> bool {
        at > self.registration_close
    }

    /// Returns the effective waiting-list limit, if any.
    pub fn effective_waitlist_limit(&self) -> Option<u32> {
        self.waitlist_limit.filter(|limit| *limit > 0)
    }

    /// Checks structural rules.
    pub fn validate(&self) -> ModelResult<()> {
        if self.title.trim().is_empty() {
            return Err(ModelError::validation("event title must not be empty"));
        }
        if !self.geofence.is_valid() {
            return Err(ModelError::validation(format!(
                "event {} has an invalid geofence",
                self.id
            )));
        }
        if self.registration_open > self.registration_close {
            return Err(ModelError::validation(format!(
                "event {} registration opens after it closes",
                self.id
            )));
        }
        if self.organizer.is_empty() {
            return Err(ModelError::validation("event organizer must be set"));
        }
        Ok(())
    }

    /// Checks that `self` is an allowed replacement for `prev`.
    pub fn validate_update(&self, prev: &Event) -> ModelResult<()> {
        if !prev.published {
            return Ok(());
        }
        if !self.published {
            return Err(ModelError::ImmutableField { field: "published" });
        }
        if self.title != prev.title {
            return Err(ModelError::ImmutableField { field: "title" });
        }
        if self.geofence != prev.geofence {
            return Err(ModelError::ImmutableField { field: "geofence" });
        }
        if self.registration_open != prev.registration_open
            || self.registration_close != prev.registration_close
        {
            return Err(ModelError::ImmutableField {
                field: "registration window",
            });
        }
        if self.organizer != prev.organizer {
            return Err(ModelError::ImmutableField { field: "organizer" });
        }
        if self.waitlist_limit != prev.waitlist_limit {
            return Err(ModelError::ImmutableField {
                field: "waitlist_limit",
            });
        }
        Ok(())
    }
}
