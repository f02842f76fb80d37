//! Entrants and their lifecycle.

use crate::error::{ModelError, ModelResult};
use crate::geo::LocationSample;
use crate::id::{EntrantId, EventId, UserId};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an entrant.
///
/// ```text
/// Registered -> CheckedIn -> Selected    -> Notified
///                         \> NotSelected -/
/// ```
///
/// Transitions only move forward one step; `Notified` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntrantStatus {
    /// Joined the waiting list.
    Registered,
    /// Scanned the event QR code.
    CheckedIn,
    /// Won a place in the draw.
    Selected,
    /// Took part in the draw without winning.
    NotSelected,
    /// Has been told the result.
    Notified,
}

impl EntrantStatus {
    /// Returns true if `next` directly follows `self`.
    pub fn can_transition_to(self, next: EntrantStatus) -> bool {
        use EntrantStatus::*;
        matches!(
            (self, next),
            (Registered, CheckedIn)
                | (CheckedIn, Selected)
                | (CheckedIn, NotSelected)
                | (Selected, Notified)
                | (NotSelected, Notified)
        )
    }

    /// Returns true for the terminal state.
    pub fn is_terminal(self) -> bool {
        self == EntrantStatus::Notified
    }

    /// Returns true once the entrant has been through check-in.
    pub fn is_checked_in_or_later(self) -> bool {
        self != EntrantStatus::Registered
    }
}

impl fmt::Display for EntrantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of the draw for one entrant, kept after notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DrawOutcome {
    /// Won a place.
    Selected,
    /// Did not win.
    NotSelected,
}

impl DrawOutcome {
    fn status(self) -> EntrantStatus {
        match self {
            DrawOutcome::Selected => EntrantStatus::Selected,
            DrawOutcome::NotSelected => EntrantStatus::NotSelected,
        }
    }
}

/// A winner's answer to the invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvitationResponse {
    /// Will attend.
    Accepted,
    /// Gives the place up.
    Declined,
}

/// A user's registration for one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entrant {
    /// Entrant identifier.
    pub id: EntrantId,
    /// Event the entrant registered for.
    pub event_id: EventId,
    /// Authenticated user behind the registration.
    pub user_id: UserId,
    /// Name shown to organizers.
    pub display_name: String,
    /// Contact address.
    #[serde(default)]
    pub email: Option<String>,
    /// Whether push notifications may be sent.
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
    /// Device push token; the per-entrant topic is used when absent.
    #[serde(default)]
    pub push_token: Option<String>,
    /// When the entrant joined the waiting list.
    pub registered_at: Timestamp,
    /// When the entrant checked in.
    #[serde(default)]
    pub checked_in_at: Option<Timestamp>,
    /// Location reported at check-in.
    #[serde(default)]
    pub check_in_location: Option<LocationSample>,
    /// Lifecycle state.
    pub status: EntrantStatus,
    /// Draw result.
    #[serde(default)]
    pub outcome: Option<DrawOutcome>,
    /// Invitation answer, winners only.
    #[serde(default)]
    pub response: Option<InvitationResponse>,
    /// When the invitation was answered.
    #[serde(default)]
    pub responded_at: Option<Timestamp>,
}

fn default_true() -> bool {
    true
}

impl Entrant {
    /// Creates a freshly registered entrant.
    pub fn new(
        event_id: EventId,
        user_id: UserId,
        display_name: impl Into<String>,
        registered_at: Timestamp,
    ) -> Self {
        Self {
            id: EntrantId::new(),
            event_id,
            user_id,
            display_name: display_name.into(),
            email: None,
            notifications_enabled: true,
            push_token: None,
            registered_at,
            checked_in_at: None,
            check_in_location: None,
            status: EntrantStatus::Registered,
            outcome: None,
            response: None,
            responded_at: None,
        }
    }

    /// Sets the contact address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Moves to `next`, enforcing forward-only transitions.
    pub fn transition(&mut self, next: EntrantStatus) -> ModelResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ModelError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Records a check-in.
    pub fn check_in(&mut self, at: Timestamp, location: Option<LocationSample>) -> ModelResult<()> {
        self.transition(EntrantStatus::CheckedIn)?;
        self.checked_in_at = Some(at);
        self.check_in_location = location;
        Ok(())
    }

    /// Records the draw result.
    pub fn record_outcome(&mut self, outcome: DrawOutcome) -> ModelResult<()> {
        self.transition(outcome.status())?;
        self.outcome = Some(outcome);
        Ok(())
    }

    /// Records that the result was delivered.
    pub fn mark_notified(&mut self) -> ModelResult<()> {
        self.transition(EntrantStatus::Notified)
    }

    /// Records the winner's answer to the invitation.
    pub fn respond(&mut self, response: InvitationResponse, at: Timestamp) -> ModelResult<()> {
        if self.status != EntrantStatus::Notified || self.outcome != Some(DrawOutcome::Selected) {
            return Err(ModelError::validation(format!(
                "entrant {} has no pending invitation",
                self.id
            )));
        }
        if self.response.is_some() {
            return Err(ModelError::validation(format!(
                "entrant {} already answered the invitation",
                self.id
            )));
        }
        self.response = Some(response);
        self.responded_at = Some(at);
        Ok(())
    }

    /// Checks that status and the fields it implies agree.
    pub fn validate(&self) -> ModelResult<()> {
        if self.user_id.is_empty() {
            return Err(ModelError::validation(format!(
                "entrant {} has no user",
                self.id
            )));
        }
        if self.status.is_checked_in_or_later() && self.checked_in_at.is_none() {
            return Err(ModelError::validation(format!(
                "entrant {} is {} without a check-in time",
                self.id, self.status
            )));
        }
        if let Some(sample) = &self.check_in_location {
            if !sample.is_valid() {
                return Err(ModelError::validation(format!(
                    "entrant {} has an invalid check-in location",
                    self.id
                )));
            }
        }
        let outcome_ok = match self.status {
            EntrantStatus::Registered | EntrantStatus::CheckedIn => self.outcome.is_none(),
            EntrantStatus::Selected => self.outcome == Some(DrawOutcome::Selected),
            EntrantStatus::NotSelected => self.outcome == Some(DrawOutcome::NotSelected),
            EntrantStatus::Notified => self.outcome.is_some(),
        };
        if !outcome_ok {
            return Err(ModelError::validation(format!(
                "entrant {} outcome {:?} does not match status {}",
                self.id, self.outcome, self.status
            )));
        }
        if self.response.is_some()
            && (self.status != EntrantStatus::Notified
                || self.outcome != Some(DrawOutcome::Selected))
        {
            return Err(ModelError::validation(format!(
                "entrant {} answered an invitation it never received",
                self.id
            )));
        }
        Ok(())
    }

    /// Checks that `self` is an allowed replacement for `prev`.
    pub fn validate_update(&self, prev: &Entrant) -> ModelResult<()> {
        if self.event_id != prev.event_id {
            return Err(ModelError::ImmutableField { field: "event_id" });
        }
        if self.user_id != prev.user_id {
            return Err(ModelError::ImmutableField { field: "user_id" });
        }
        if self.status != prev.status && !prev.status.can_transition_to(self.status) {
            return Err(ModelError::InvalidTransition {
                from: prev.status.to_string(),
                to: self.status.to_string(),
            });
        }
        if prev.outcome.is_some() && self.outcome != prev.outcome {
            return Err(ModelError::ImmutableField { field: "outcome" });
        }
        if prev.response.is_some() && self.response != prev.response {
            return Err(ModelError::ImmutableField { field: "response" });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinate;

    fn entrant() -> Entrant {
        Entrant::new(
            EventId::new(),
            UserId::new("user-1"),
            "Ada",
            Timestamp::from_millis(100),
        )
    }

    fn sample() -> LocationSample {
        LocationSample::new(Coordinate::new(1.0, 1.0), 5.0, Timestamp::from_millis(200))
    }

    #[test]
    fn forward_transitions_only() {
        use EntrantStatus::*;
        assert!(Registered.can_transition_to(CheckedIn));
        assert!(CheckedIn.can_transition_to(Selected));
        assert!(CheckedIn.can_transition_to(NotSelected));
        assert!(Selected.can_transition_to(Notified));
        assert!(NotSelected.can_transition_to(Notified));

        assert!(!Registered.can_transition_to(Selected));
        assert!(!Selected.can_transition_to(NotSelected));
        assert!(!Notified.can_transition_to(CheckedIn));
        assert!(!CheckedIn.can_transition_to(CheckedIn));
        assert!(Notified.is_terminal());
    }

    #[test]
    fn full_lifecycle() {
        let mut e = entrant();
        e.check_in(Timestamp::from_millis(210), Some(sample())).unwrap();
        e.record_outcome(DrawOutcome::Selected).unwrap();
        e.mark_notified().unwrap();
        e.respond(InvitationResponse::Accepted, Timestamp::from_millis(300))
            .unwrap();

        assert_eq!(e.status, EntrantStatus::Notified);
        assert_eq!(e.outcome, Some(DrawOutcome::Selected));
        e.validate().unwrap();
    }

    #[test]
    fn cannot_skip_check_in() {
        let mut e = entrant();
        let err = e.record_outcome(DrawOutcome::Selected).unwrap_err();
        assert!(matches!(err, ModelError::InvalidTransition { .. }));
        assert_eq!(e.status, EntrantStatus::Registered);
    }

    #[test]
    fn losers_cannot_respond() {
        let mut e = entrant();
        e.check_in(Timestamp::from_millis(210), None).unwrap();
        e.record_outcome(DrawOutcome::NotSelected).unwrap();
        e.mark_notified().unwrap();
        assert!(e
            .respond(InvitationResponse::Accepted, Timestamp::from_millis(300))
            .is_err());
    }

    #[test]
    fn update_rejects_backward_status() {
        let mut prev = entrant();
        prev.check_in(Timestamp::from_millis(210), None).unwrap();

        let mut next = prev.clone();
        next.status = EntrantStatus::Registered;
        assert!(matches!(
            next.validate_update(&prev),
            Err(ModelError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn validate_requires_check_in_time() {
        let mut e = entrant();
        e.status = EntrantStatus::CheckedIn;
        assert!(e.validate().is_err());
    }

    #[test]
    fn notifications_default_to_enabled() {
        let json = serde_json::json!({
            "id": EntrantId::new(),
            "event_id": EventId::new(),
            "user_id": "u",
            "display_name": "Bo",
            "registered_at": 1,
            "status": "Registered"
        });
        let e: Entrant = serde_json::from_value(json).unwrap();
        assert!(e.notifications_enabled);
        assert!(e.email.is_none());
    }
}
