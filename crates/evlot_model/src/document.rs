//! Tagged documents and their addressing.

use crate::codec::{self, FieldMap};
use crate::draw::DrawRecord;
use crate::entrant::Entrant;
use crate::error::{ModelError, ModelResult};
use crate::event::Event;
use crate::id::{EntrantId, EventId, NotificationId};
use crate::notification::NotificationRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Remote collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Collection {
    /// `events`
    Events,
    /// `entrants`
    Entrants,
    /// `draws`
    Draws,
    /// `notifications`
    Notifications,
}

impl Collection {
    /// All collections, in sync order.
    pub const ALL: [Collection; 4] = [
        Collection::Events,
        Collection::Entrants,
        Collection::Draws,
        Collection::Notifications,
    ];

    /// Returns the remote collection name.
    pub fn name(self) -> &'static str {
        match self {
            Collection::Events => "events",
            Collection::Entrants => "entrants",
            Collection::Draws => "draws",
            Collection::Notifications => "notifications",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Address of a document: collection plus id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocKey {
    /// Collection holding the document.
    pub collection: Collection,
    /// Document id within the collection.
    pub id: Uuid,
}

impl DocKey {
    /// Key of an event document.
    pub fn event(id: EventId) -> Self {
        Self {
            collection: Collection::Events,
            id: id.to_uuid(),
        }
    }

    /// Key of an entrant document.
    pub fn entrant(id: EntrantId) -> Self {
        Self {
            collection: Collection::Entrants,
            id: id.to_uuid(),
        }
    }

    /// Key of the draw document of an event.
    pub fn draw(event_id: EventId) -> Self {
        Self {
            collection: Collection::Draws,
            id: event_id.to_uuid(),
        }
    }

    /// Key of a notification document.
    pub fn notification(id: NotificationId) -> Self {
        Self {
            collection: Collection::Notifications,
            id: id.to_uuid(),
        }
    }
}

impl fmt::Debug for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocKey({}/{})", self.collection, self.id)
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A typed document from one of the remote collections.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    /// An event.
    Event(Event),
    /// An entrant.
    Entrant(Entrant),
    /// A draw record.
    Draw(DrawRecord),
    /// A notification log entry.
    Notification(NotificationRecord),
}

impl Document {
    /// Returns the document's key.
    pub fn key(&self) -> DocKey {
        match self {
            Document::Event(e) => DocKey::event(e.id),
            Document::Entrant(e) => DocKey::entrant(e.id),
            Document::Draw(d) => DocKey::draw(d.event_id),
            Document::Notification(n) => DocKey::notification(n.id),
        }
    }

    /// Returns the document's collection.
    pub fn collection(&self) -> Collection {
        self.key().collection
    }

    /// Returns the event this document belongs to.
    pub fn event_id(&self) -> EventId {
        match self {
            Document::Event(e) => e.id,
            Document::Entrant(e) => e.event_id,
            Document::Draw(d) => d.event_id,
            Document::Notification(n) => n.event_id,
        }
    }

    /// Returns the event, if this is one.
    pub fn as_event(&self) -> Option<&Event> {
        match self {
            Document::Event(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the entrant, if this is one.
    pub fn as_entrant(&self) -> Option<&Entrant> {
        match self {
            Document::Entrant(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the draw record, if this is one.
    pub fn as_draw(&self) -> Option<&DrawRecord> {
        match self {
            Document::Draw(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the notification, if this is one.
    pub fn as_notification(&self) -> Option<&NotificationRecord> {
        match self {
            Document::Notification(n) => Some(n),
            _ => None,
        }
    }

    /// Checks the document on its own.
    pub fn validate(&self) -> ModelResult<()> {
        match self {
            Document::Event(e) => e.validate(),
            Document::Entrant(e) => e.validate(),
            Document::Draw(d) => d.validate(),
            Document::Notification(n) => n.validate(),
        }
    }

    /// Checks that `self` may replace `prev`.
    pub fn validate_update(&self, prev: &Document) -> ModelResult<()> {
        if self.key() != prev.key() {
            return Err(ModelError::validation(format!(
                "document key changed from {} to {}",
                prev.key(),
                self.key()
            )));
        }
        match (self, prev) {
            (Document::Event(next), Document::Event(prev)) => next.validate_update(prev),
            (Document::Entrant(next), Document::Entrant(prev)) => next.validate_update(prev),
            (Document::Draw(next), Document::Draw(prev)) => {
                if next == prev {
                    Ok(())
                } else {
                    Err(ModelError::ImmutableDocument { collection: "draws" })
                }
            }
            (Document::Notification(next), Document::Notification(prev)) => {
                next.validate_update(prev)
            }
            _ => Err(ModelError::validation("document kind changed")),
        }
    }

    /// Converts to a field map.
    pub fn to_fields(&self) -> ModelResult<FieldMap> {
        let name = self.collection().name();
        match self {
            Document::Event(e) => codec::to_fields(name, e),
            Document::Entrant(e) => codec::to_fields(name, e),
            Document::Draw(d) => codec::to_fields(name, d),
            Document::Notification(n) => codec::to_fields(name, n),
        }
    }

    /// Rebuilds and validates a document read from `key`.
    ///
    /// Fails if the fields do not decode, the decoded id does not match
    /// `key`, or the document breaks a domain rule.
    pub fn from_fields(key: DocKey, fields: &FieldMap) -> ModelResult<Document> {
        let name = key.collection.name();
        let doc = match key.collection {
            Collection::Events => Document::Event(codec::from_fields(name, fields)?),
            Collection::Entrants => Document::Entrant(codec::from_fields(name, fields)?),
            Collection::Draws => Document::Draw(codec::from_fields(name, fields)?),
            Collection::Notifications => {
                Document::Notification(codec::from_fields(name, fields)?)
            }
        };
        if doc.key() != key {
            return Err(ModelError::malformed(
                name,
                format!("document stored at {key} identifies as {}", doc.key()),
            ));
        }
        doc.validate()?;
        Ok(doc)
    }
}

impl From<Event> for Document {
    fn from(e: Event) -> Self {
        Document::Event(e)
    }
}

impl From<Entrant> for Document {
    fn from(e: Entrant) -> Self {
        Document::Entrant(e)
    }
}

impl From<DrawRecord> for Document {
    fn from(d: DrawRecord) -> Self {
        Document::Draw(d)
    }
}

impl From<NotificationRecord> for Document {
    fn from(n: NotificationRecord) -> Self {
        Document::Notification(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{Coordinate, Geofence};
    use crate::id::UserId;
    use crate::time::Timestamp;
    use ciborium::Value;

    fn event() -> Event {
        Event::new(
            "Pottery night",
            4,
            Geofence::new(Coordinate::new(45.0, -75.0), 250.0),
            Timestamp::from_millis(0),
            Timestamp::from_millis(10_000),
            UserId::new("org"),
        )
    }

    #[test]
    fn event_survives_field_map() {
        let doc = Document::Event(event());
        let fields = doc.to_fields().unwrap();
        let back = Document::from_fields(doc.key(), &fields).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn key_mismatch_rejected() {
        let doc = Document::Event(event());
        let fields = doc.to_fields().unwrap();
        let wrong = DocKey::event(EventId::new());
        assert!(matches!(
            Document::from_fields(wrong, &fields),
            Err(ModelError::Malformed { .. })
        ));
    }

    #[test]
    fn invalid_document_rejected_at_boundary() {
        let doc = Document::Event(event());
        let mut fields = doc.to_fields().unwrap();
        fields.insert("title".into(), Value::Text("   ".into()));
        assert!(matches!(
            Document::from_fields(doc.key(), &fields),
            Err(ModelError::Validation(_))
        ));
    }

    #[test]
    fn draw_key_is_event_id() {
        let id = EventId::new();
        assert_eq!(DocKey::draw(id).id, id.to_uuid());
        assert_eq!(DocKey::draw(id).collection, Collection::Draws);
        assert_eq!(DocKey::draw(id).to_string(), format!("draws/{id}"));
    }

    #[test]
    fn kind_change_rejected() {
        let e = event();
        let other = Document::Event(e.clone());
        let mut moved = e;
        moved.id = EventId::new();
        assert!(Document::Event(moved).validate_update(&other).is_err());
    }
}
