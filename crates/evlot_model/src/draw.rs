//! Draw records: the append-only audit trail of a lottery.

use crate::entrant::DrawOutcome;
use crate::error::{ModelError, ModelResult};
use crate::id::{EntrantId, EventId, UserId};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt::Write as _;

/// The outcome of a single draw.
///
/// A record is created once per event and never changed. Together with
/// `seed` and the `pool` snapshot it is enough to re-run the draw and
/// reproduce `selected` exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawRecord {
    /// Event the draw belongs to; also the document id.
    pub event_id: EventId,
    /// Seed fed to the permutation.
    pub seed: u64,
    /// Event capacity at draw time.
    pub capacity: u32,
    /// Eligible entrants in the order they were drawn from.
    pub pool: Vec<EntrantId>,
    /// Winners in draw order.
    pub selected: Vec<EntrantId>,
    /// When the draw ran.
    pub drawn_at: Timestamp,
    /// Who ran the draw.
    pub drawn_by: UserId,
    /// Hex SHA-256 over the event id and pool.
    pub pool_digest: String,
}

impl DrawRecord {
    /// Builds a record, computing the pool digest.
    pub fn new(
        event_id: EventId,
        seed: u64,
        capacity: u32,
        pool: Vec<EntrantId>,
        selected: Vec<EntrantId>,
        drawn_at: Timestamp,
        drawn_by: UserId,
    ) -> Self {
        let pool_digest = pool_digest(&event_id, &pool);
        Self {
            event_id,
            seed,
            capacity,
            pool,
            selected,
            drawn_at,
            drawn_by,
            pool_digest,
        }
    }

    /// Pool members that were not selected, in pool order.
    pub fn not_selected(&self) -> Vec<EntrantId> {
        let winners: HashSet<_> = self.selected.iter().collect();
        self.pool
            .iter()
            .filter(|id| !winners.contains(id))
            .copied()
            .collect()
    }

    /// Returns the outcome for `entrant`, or `None` if it was not in the pool.
    pub fn outcome_for(&self, entrant: &EntrantId) -> Option<DrawOutcome> {
        if self.selected.contains(entrant) {
            Some(DrawOutcome::Selected)
        } else if self.pool.contains(entrant) {
            Some(DrawOutcome::NotSelected)
        } else {
            None
        }
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> ModelResult<()> {
        if self.pool.is_empty() {
            return Err(ModelError::validation("draw pool is empty"));
        }
        let pool: HashSet<_> = self.pool.iter().collect();
        if pool.len() != self.pool.len() {
            return Err(ModelError::validation("draw pool contains duplicates"));
        }
        let selected: HashSet<_> = self.selected.iter().collect();
        if selected.len() != self.selected.len() {
            return Err(ModelError::validation("draw selected list contains duplicates"));
        }
        if !selected.is_subset(&pool) {
            return Err(ModelError::validation("selected entrant outside the pool"));
        }
        let expected = self.pool.len().min(self.capacity as usize);
        if self.selected.len() != expected {
            return Err(ModelError::validation(format!(
                "draw selected {} entrants, expected {expected}",
                self.selected.len()
            )));
        }
        if self.pool_digest != pool_digest(&self.event_id, &self.pool) {
            return Err(ModelError::validation("draw pool digest mismatch"));
        }
        Ok(())
    }
}

/// Computes the hex SHA-256 digest of an event's draw pool.
pub fn pool_digest(event_id: &EventId, pool: &[EntrantId]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event_id.as_bytes());
    for id in pool {
        hasher.update(id.as_bytes());
    }
    hasher.finalize().iter().fold(String::with_capacity(64), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
