//! Pending local mutations.

use crate::remote::MutationOp;
use evlot_model::{DocKey, Timestamp, UserId};
use std::collections::{BTreeSet, VecDeque};

/// A local write waiting to be pushed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMutation {
    /// Assigned operation id, increasing in write order.
    pub op_id: u64,
    /// Target document.
    pub key: DocKey,
    /// The change.
    pub op: MutationOp,
    /// Local clock at the time of the write.
    pub local_at: Timestamp,
    /// User the write is attributed to.
    pub author: UserId,
}

/// Local writes in commit order plus the remote pull cursor.
///
/// # Invariants
///
/// - Mutations are kept in write order
/// - A mutation leaves the log once the remote accepts or rejects it
#[derive(Debug)]
pub struct Oplog {
    entries: VecDeque<PendingMutation>,
    next_op_id: u64,
    server_cursor: u64,
}

impl Oplog {
    /// Creates an empty oplog.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_op_id: 1,
            server_cursor: 0,
        }
    }

    /// Appends a mutation and returns its operation id.
    pub fn append(
        &mut self,
        key: DocKey,
        op: MutationOp,
        local_at: Timestamp,
        author: UserId,
    ) -> u64 {
        let op_id = self.next_op_id;
        self.next_op_id += 1;
        self.entries.push_back(PendingMutation {
            op_id,
            key,
            op,
            local_at,
            author,
        });
        op_id
    }

    /// Returns the oldest `limit` pending mutations.
    pub fn pending_batch(&self, limit: usize) -> Vec<PendingMutation> {
        self.entries.iter().take(limit).cloned().collect()
    }

    /// Removes the mutation with `op_id`.
    pub fn acknowledge(&mut self, op_id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|m| m.op_id != op_id);
        self.entries.len() != before
    }

    /// Drops every pending mutation for `key` and returns how many there were.
    pub fn discard_for(&mut self, key: &DocKey) -> usize {
        let before = self.entries.len();
        self.entries.retain(|m| &m.key != key);
        before - self.entries.len()
    }

    /// Returns true if `key` has unpushed writes.
    pub fn has_pending(&self, key: &DocKey) -> bool {
        self.entries.iter().any(|m| &m.key == key)
    }

    /// Names of fields written by pending puts on `key`.
    pub fn pending_fields(&self, key: &DocKey) -> BTreeSet<String> {
        self.entries
            .iter()
            .filter(|m| &m.key == key)
            .filter_map(|m| match &m.op {
                MutationOp::Put { changed, .. } => Some(changed.iter().cloned()),
                MutationOp::Delete => None,
            })
            .flatten()
            .collect()
    }

    /// Number of pending mutations.
    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }

    /// Returns the remote pull cursor.
    pub fn server_cursor(&self) -> u64 {
        self.server_cursor
    }

    /// Updates the remote pull cursor.
    pub fn set_server_cursor(&mut self, cursor: u64) {
        self.server_cursor = cursor;
    }

    /// Clears everything, including the cursor.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.server_cursor = 0;
    }
}

impl Default for Oplog {
    fn default() -> Self {
        Self::new()
    }
}
