//! Seeded, auditable winner selection.
//!
//! A draw shuffles the pool with a Fisher-Yates pass driven by a ChaCha20
//! generator seeded from the draw's `u64` seed, and takes the first
//! `capacity` entries. The seed and the pool snapshot are stored in the
//! [`DrawRecord`], so anyone holding the record can replay the draw.
//!
//! ## Single-shot draws
//!
//! Each event gets at most one record. A draw runs under a per-event lock,
//! checks the local cache, then writes the record with a remote
//! conditional create; losing either check yields
//! [`LotteryError::AlreadyDrawn`] without touching any document.

use crate::error::{AlreadyDrawnError, LotteryError, LotteryResult};
use evlot_model::{
    pool_digest, DocKey, DrawOutcome, DrawRecord, EntrantId, EntrantStatus, Event, EventId,
};
use evlot_sync::{SyncError, SyncStore};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Selects up to `capacity` winners from `pool`.
///
/// Pure: the same pool order, capacity and seed always give the same list.
/// When the pool fits, every member wins in pool order.
pub fn select_winners(pool: &[EntrantId], capacity: u32, seed: u64) -> Vec<EntrantId> {
    let capacity = capacity as usize;
    if capacity >= pool.len() {
        return pool.to_vec();
    }

    let mut order = pool.to_vec();
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    for i in (1..order.len()).rev() {
        let j = rng.gen_range(0..=i);
        order.swap(i, j);
    }
    order.truncate(capacity);
    order
}

/// Outcome of replaying a stored draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    /// Whether the stored digest matches the pool snapshot.
    pub digest_matches: bool,
    /// Whether replaying the seed reproduces the selected list.
    pub selection_matches: bool,
    /// The replayed selection.
    pub replayed: Vec<EntrantId>,
}

impl Verification {
    /// Returns true if the record is authentic.
    pub fn is_valid(&self) -> bool {
        self.digest_matches && self.selection_matches
    }
}

/// Replays `record` from its seed and pool snapshot.
pub fn verify(record: &DrawRecord) -> Verification {
    let replayed = select_winners(&record.pool, record.capacity, record.seed);
    Verification {
        digest_matches: record.pool_digest == pool_digest(&record.event_id, &record.pool),
        selection_matches: replayed == record.selected,
        replayed,
    }
}

/// Runs single-shot draws against a sync store.
pub struct LotteryEngine {
    store: Arc<SyncStore>,
    locks: Mutex<HashMap<EventId, Arc<Mutex<()>>>>,
}

impl LotteryEngine {
    /// Creates an engine over `store`.
    pub fn new(store: Arc<SyncStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn event_lock(&self, event_id: EventId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.lock().entry(event_id).or_default())
    }

    /// Draws winners for `event` from `pool` with `seed`.
    ///
    /// Every pool member must be a checked-in entrant of the event. On
    /// success the record is persisted and every pool member moves to
    /// `Selected` or `NotSelected`.
    pub fn draw(&self, event: &Event, pool: &[EntrantId], seed: u64) -> LotteryResult<DrawRecord> {
        let lock = self.event_lock(event.id);
        let _guard = lock.lock();

        if let Some(existing) = self.store.draw(event.id)? {
            return Err(already_drawn(&existing));
        }
        if pool.is_empty() {
            return Err(LotteryError::EmptyPool { event_id: event.id });
        }

        let mut seen = HashSet::with_capacity(pool.len());
        let mut entrants = Vec::with_capacity(pool.len());
        for id in pool {
            if !seen.insert(*id) {
                return Err(LotteryError::DuplicateEntrant { entrant_id: *id });
            }
            let entrant = self
                .store
                .entrant(*id)?
                .ok_or(LotteryError::EntrantNotFound(*id))?;
            if entrant.event_id != event.id {
                return Err(LotteryError::EventMismatch {
                    entrant_id: *id,
                    event_id: event.id,
                });
            }
            if entrant.status != EntrantStatus::CheckedIn {
                return Err(LotteryError::NotCheckedIn {
                    entrant_id: *id,
                    status: entrant.status,
                });
            }
            entrants.push(entrant);
        }

        let selected = select_winners(pool, event.capacity, seed);
        let record = DrawRecord::new(
            event.id,
            seed,
            event.capacity,
            pool.to_vec(),
            selected,
            self.store.now(),
            self.store.user_id()?,
        );

        match self.store.create_exclusive(record.clone()) {
            Ok(()) => {}
            Err(SyncError::AlreadyExists { .. }) => {
                warn!(event = %event.id, "draw lost the race to another session");
                let existing = self.store.draw(event.id).ok().flatten();
                return Err(LotteryError::AlreadyDrawn(AlreadyDrawnError {
                    event_id: event.id,
                    drawn_at: existing.map(|r| r.drawn_at),
                }));
            }
            Err(e) => return Err(e.into()),
        }

        for mut entrant in entrants {
            let outcome = record.outcome_for(&entrant.id).unwrap_or(DrawOutcome::NotSelected);
            entrant.record_outcome(outcome)?;
            self.store.upsert(entrant)?;
        }

        info!(
            event = %event.id,
            seed,
            pool = record.pool.len(),
            selected = record.selected.len(),
            "draw complete"
        );
        debug!(key = %DocKey::draw(event.id), digest = %record.pool_digest, "draw record stored");
        Ok(record)
    }

    /// Replays the stored draw of an event.
    pub fn verify_event(&self, event_id: EventId) -> LotteryResult<Option<Verification>> {
        Ok(self.store.draw(event_id)?.as_ref().map(verify))
    }
}

fn already_drawn(record: &DrawRecord) -> LotteryError {
    LotteryError::AlreadyDrawn(AlreadyDrawnError {
        event_id: record.event_id,
        drawn_at: Some(record.drawn_at),
    })
}
