//! Field-level last-writer-wins merge.
//!
//! Each cached field carries the stamp of the write that produced it.
//! When a remote version arrives, every field is decided on its own: the
//! higher stamp wins, and on equal times the server copy wins.

use evlot_model::{FieldMap, Timestamp};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Where a field value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StampOrigin {
    /// Written locally and not yet acknowledged.
    Local,
    /// Assigned by the remote store.
    Server,
}

/// Version stamp of a single field.
///
/// Ordered by time first; on a tie `Server` sorts above `Local`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldStamp {
    /// Write time.
    pub at: Timestamp,
    /// Origin of the write.
    pub origin: StampOrigin,
}

impl FieldStamp {
    /// A stamp for a local write.
    pub fn local(at: Timestamp) -> Self {
        Self {
            at,
            origin: StampOrigin::Local,
        }
    }

    /// A stamp assigned by the server.
    pub fn server(at: Timestamp) -> Self {
        Self {
            at,
            origin: StampOrigin::Server,
        }
    }

    /// Returns true for unacknowledged local writes.
    pub fn is_local(&self) -> bool {
        self.origin == StampOrigin::Local
    }
}

impl Ord for FieldStamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at
            .cmp(&other.at)
            .then_with(|| self.origin.cmp(&other.origin))
    }
}

impl PartialOrd for FieldStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Stamps keyed by field name.
pub type StampMap = BTreeMap<String, FieldStamp>;

/// Result of merging a remote version into a cached one.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    /// Merged field values.
    pub fields: FieldMap,
    /// Stamps of the merged values.
    pub stamps: StampMap,
    /// Fields where a pending local value beat a different remote value.
    pub local_kept: Vec<String>,
    /// Fields where the remote value replaced a different local value.
    pub remote_won: Vec<String>,
}

impl Merged {
    /// Returns true if a pending local write and a remote write touched
    /// the same field with different values.
    pub fn is_conflict(&self) -> bool {
        !self.local_kept.is_empty()
    }
}

/// Merges `remote` (with server timestamps per field) into `local`.
///
/// Fields missing on one side are taken from the other. A local field
/// without a stamp loses to any remote stamp.
pub fn merge_fields(
    local: &FieldMap,
    local_stamps: &StampMap,
    remote: &FieldMap,
    remote_times: &BTreeMap<String, Timestamp>,
) -> Merged {
    let mut merged = Merged {
        fields: FieldMap::new(),
        stamps: StampMap::new(),
        local_kept: Vec::new(),
        remote_won: Vec::new(),
    };

    for (name, remote_value) in remote {
        let remote_stamp = FieldStamp::server(remote_times.get(name).copied().unwrap_or_default());
        match (local.get(name), local_stamps.get(name)) {
            (Some(local_value), Some(local_stamp)) if *local_stamp > remote_stamp => {
                if local_value != remote_value {
                    merged.local_kept.push(name.clone());
                }
                merged.fields.insert(name.clone(), local_value.clone());
                merged.stamps.insert(name.clone(), *local_stamp);
            }
            (local_value, _) => {
                if local_value.is_some_and(|v| v != remote_value) {
                    merged.remote_won.push(name.clone());
                }
                merged.fields.insert(name.clone(), remote_value.clone());
                merged.stamps.insert(name.clone(), remote_stamp);
            }
        }
    }

    for (name, local_value) in local {
        if !remote.contains_key(name) {
            merged.fields.insert(name.clone(), local_value.clone());
            if let Some(stamp) = local_stamps.get(name) {
                merged.stamps.insert(name.clone(), *stamp);
            }
        }
    }

    merged
}
