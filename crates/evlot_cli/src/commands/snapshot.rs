//! JSON snapshots and the offline backend built from them.

use evlot_core::{CoordinatorConfig, LotteryCoordinator, MemoryGateway};
use evlot_model::{
    Clock, Document, DrawRecord, Entrant, Event, EventId, ManualClock, Timestamp,
};
use evlot_sync::{AuthConfig, MemoryRemote, SyncStore, TokenIssuer, TokenValidator};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Exported documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Events.
    #[serde(default)]
    pub events: Vec<Event>,
    /// Entrants of any of the events.
    #[serde(default)]
    pub entrants: Vec<Entrant>,
    /// Stored draw records.
    #[serde(default)]
    pub draws: Vec<DrawRecord>,
}

impl Snapshot {
    /// Reads a snapshot file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let text = fs::read_to_string(path)
            .map_err(|e| format!("cannot read snapshot {}: {e}", path.display()))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Writes the snapshot as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Collects the live events, entrants and draws of a store.
    pub fn from_store(store: &SyncStore) -> Result<Self, Box<dyn std::error::Error>> {
        let mut snapshot = Snapshot::default();
        for doc in store.query(|_| true)? {
            match doc {
                Document::Event(event) => snapshot.events.push(event),
                Document::Entrant(entrant) => snapshot.entrants.push(entrant),
                Document::Draw(record) => snapshot.draws.push(record),
                Document::Notification(_) => {}
            }
        }
        Ok(snapshot)
    }

    /// Returns an event by id.
    pub fn event(&self, event_id: EventId) -> Result<&Event, Box<dyn std::error::Error>> {
        self.events
            .iter()
            .find(|e| e.id == event_id)
            .ok_or_else(|| format!("event {event_id} not in snapshot").into())
    }

    /// Loads the snapshot into a private in-memory backend and signs in as
    /// the event's organizer at `at` (now if `None`).
    pub fn open(
        &self,
        event_id: EventId,
        at: Option<Timestamp>,
    ) -> Result<LotteryCoordinator, Box<dyn std::error::Error>> {
        let organizer = self.event(event_id)?.organizer.clone();
        let clock = Arc::new(ManualClock::new(at.unwrap_or_else(Timestamp::now)));
        let auth = AuthConfig::new(rand::random::<[u8; 32]>().to_vec());
        let remote = Arc::new(MemoryRemote::new(
            TokenValidator::new(auth.clone()),
            clock.clone(),
        ));

        let docs = self
            .events
            .iter()
            .cloned()
            .map(Document::Event)
            .chain(self.entrants.iter().cloned().map(Document::Entrant))
            .chain(self.draws.iter().cloned().map(Document::Draw));
        for doc in docs {
            remote.seed(&doc)?;
        }
        debug!(
            events = self.events.len(),
            entrants = self.entrants.len(),
            draws = self.draws.len(),
            "snapshot loaded"
        );

        let session = TokenIssuer::new(auth).issue(&organizer, clock.now())?;
        let coordinator = LotteryCoordinator::open(
            CoordinatorConfig::default(),
            remote,
            session,
            clock,
            Arc::new(MemoryGateway::new()),
        );
        coordinator.sync()?;
        Ok(coordinator)
    }
}

/// Parses an event id argument.
pub fn parse_event_id(text: &str) -> Result<EventId, Box<dyn std::error::Error>> {
    Ok(text.parse()?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use evlot_testkit::{checked_in_entrant, event_fixture, START};

    /// A published event with `checked_in` entrants 10 m from the venue.
    pub(crate) fn sample_snapshot(capacity: u32, checked_in: usize) -> Snapshot {
        let event = event_fixture("Community Swim", capacity, "org", START).published();
        let entrants = (0..checked_in)
            .map(|i| checked_in_entrant(&event, &format!("entrant-{i}"), 10.0, START))
            .collect();
        Snapshot {
            events: vec![event],
            entrants,
            draws: Vec::new(),
        }
    }

    #[test]
    fn snapshot_survives_the_offline_backend() {
        let snapshot = sample_snapshot(2, 3);
        let event_id = snapshot.events[0].id;
        let coordinator = snapshot.open(event_id, Some(START)).unwrap();

        let mut reloaded = Snapshot::from_store(coordinator.store()).unwrap();
        reloaded.entrants.sort_by_key(|e| e.id);
        let mut expected = snapshot.clone();
        expected.entrants.sort_by_key(|e| e.id);
        assert_eq!(reloaded, expected);
    }

    #[test]
    fn missing_event_is_reported() {
        let snapshot = sample_snapshot(2, 0);
        assert!(snapshot.open(EventId::new(), Some(START)).is_err());
    }

    #[test]
    fn load_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let snapshot = sample_snapshot(1, 2);
        snapshot.save(&path).unwrap();
        assert_eq!(Snapshot::load(&path).unwrap(), snapshot);
    }
}
