//! Notification log entries.

use crate::error::{ModelError, ModelResult};
use crate::id::{EntrantId, EventId, NotificationId, UserId};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    /// The entrant won a place.
    Selected,
    /// The entrant was not drawn.
    NotSelected,
    /// Confirmation to an entrant who accepted.
    InvitationAccepted,
    /// Confirmation to an entrant who declined.
    InvitationDeclined,
    /// Tells the organizer an entrant accepted.
    EntrantAccepted,
    /// Tells the organizer an entrant declined.
    EntrantDeclined,
    /// A message the organizer wrote to a group of entrants.
    OrganizerMessage,
}

impl NotificationKind {
    /// Returns the role of the recipient.
    pub fn audience(self) -> Audience {
        match self {
            NotificationKind::EntrantAccepted | NotificationKind::EntrantDeclined => {
                Audience::Organizer
            }
            _ => Audience::Entrant,
        }
    }
}

/// Role of a notification recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Audience {
    /// Someone who registered for the event.
    Entrant,
    /// The event organizer.
    Organizer,
}

/// A delivered notification, kept for the in-app inbox and admin logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Notification identifier.
    pub id: NotificationId,
    /// User the notification was sent to.
    pub recipient: UserId,
    /// Entrant registration the notification concerns.
    #[serde(default)]
    pub entrant_id: Option<EntrantId>,
    /// Event the notification concerns.
    pub event_id: EventId,
    /// Notification kind.
    pub kind: NotificationKind,
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// When it was delivered.
    pub created_at: Timestamp,
    /// Whether the recipient opened it.
    #[serde(default)]
    pub read: bool,
}

impl NotificationRecord {
    /// Creates an unread record with a fresh id.
    pub fn new(
        recipient: UserId,
        entrant_id: Option<EntrantId>,
        event_id: EventId,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            recipient,
            entrant_id,
            event_id,
            kind,
            title: title.into(),
            message: message.into(),
            created_at,
            read: false,
        }
    }

    /// Returns the role of the recipient.
    pub fn audience(&self) -> Audience {
        self.kind.audience()
    }

    /// Checks structural rules.
    pub fn validate(&self) -> ModelResult<()> {
        if self.recipient.is_empty() {
            return Err(ModelError::validation("notification has no recipient"));
        }
        if self.message.trim().is_empty() {
            return Err(ModelError::validation("notification message is empty"));
        }
        Ok(())
    }

    /// Only the `read` flag may change after delivery.
    pub fn validate_update(&self, prev: &NotificationRecord) -> ModelResult<()> {
        let mut unread = self.clone();
        unread.read = prev.read;
        if &unread != prev {
            return Err(ModelError::ImmutableDocument {
                collection: "notifications",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: NotificationKind) -> NotificationRecord {
        NotificationRecord::new(
            UserId::new("u1"),
            None,
            EventId::new(),
            kind,
            "Lottery Results",
            "You were selected",
            Timestamp::from_millis(5),
        )
    }

    #[test]
    fn audience_follows_kind() {
        assert_eq!(record(NotificationKind::Selected).audience(), Audience::Entrant);
        assert_eq!(
            record(NotificationKind::EntrantDeclined).audience(),
            Audience::Organizer
        );
    }

    #[test]
    fn only_read_flag_is_mutable() {
        let prev = record(NotificationKind::Selected);
        let mut read = prev.clone();
        read.read = true;
        assert!(read.validate_update(&prev).is_ok());

        let mut edited = prev.clone();
        edited.message = "changed".into();
        assert!(edited.validate_update(&prev).is_err());
    }
}
