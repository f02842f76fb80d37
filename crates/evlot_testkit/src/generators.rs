//! Property-based test generators using proptest.

use evlot_model::{Coordinate, EntrantId, EventId};
use proptest::prelude::*;
use std::collections::BTreeSet;

/// Strategy for entrant ids.
pub fn entrant_id_strategy() -> impl Strategy<Value = EntrantId> {
    prop::array::uniform16(any::<u8>()).prop_map(EntrantId::from_bytes)
}

/// Strategy for event ids.
pub fn event_id_strategy() -> impl Strategy<Value = EventId> {
    prop::array::uniform16(any::<u8>()).prop_map(EventId::from_bytes)
}

/// Strategy for pools of distinct entrant ids in arbitrary order.
pub fn pool_strategy(max_len: usize) -> impl Strategy<Value = Vec<EntrantId>> {
    prop::collection::btree_set(entrant_id_strategy(), 1..=max_len.max(1))
        .prop_map(|set: BTreeSet<EntrantId>| set.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

/// Strategy for a pool together with a capacity that may be smaller or
/// larger than it.
pub fn pool_and_capacity_strategy(max_len: usize) -> impl Strategy<Value = (Vec<EntrantId>, u32)> {
    pool_strategy(max_len).prop_flat_map(|pool| {
        let len = pool.len() as u32;
        (Just(pool), 0..=len + 3)
    })
}

/// Strategy for valid coordinates away from the poles.
pub fn coordinate_strategy() -> impl Strategy<Value = Coordinate> {
    (-80.0f64..80.0, -179.0f64..179.0).prop_map(|(lat, lon)| Coordinate::new(lat, lon))
}
