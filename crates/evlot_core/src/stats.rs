//! Per-event statistics for organizers.

use evlot_model::{DrawOutcome, Entrant, EntrantStatus, Event, InvitationResponse};

/// Snapshot of an event's entrants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventStats {
    /// Everyone on the waiting list.
    pub total: u32,
    /// Status `Registered`.
    pub registered: u32,
    /// Status `CheckedIn`.
    pub checked_in: u32,
    /// Status `Selected` (not yet notified).
    pub selected: u32,
    /// Status `NotSelected` (not yet notified).
    pub not_selected: u32,
    /// Status `Notified`.
    pub notified: u32,
    /// Entrants drawn as winners, notified or not.
    pub winners: u32,
    /// Winners who accepted.
    pub accepted: u32,
    /// Winners who declined.
    pub declined: u32,
    /// Notified winners who have not answered.
    pub awaiting_response: u32,
    /// Event capacity.
    pub capacity: u32,
    /// Places not held by a winner who accepted or may still accept.
    pub open_spots: u32,
}

impl EventStats {
    /// Computes statistics over `entrants` of `event`.
    ///
    /// Entrants of other events are ignored.
    pub fn compute(event: &Event, entrants: &[Entrant]) -> Self {
        let mut stats = EventStats {
            capacity: event.capacity,
            ..Default::default()
        };
        for entrant in entrants.iter().filter(|e| e.event_id == event.id) {
            stats.total += 1;
            match entrant.status {
                EntrantStatus::Registered => stats.registered += 1,
                EntrantStatus::CheckedIn => stats.checked_in += 1,
                EntrantStatus::Selected => stats.selected += 1,
                EntrantStatus::NotSelected => stats.not_selected += 1,
                EntrantStatus::Notified => stats.notified += 1,
            }
            if entrant.outcome == Some(DrawOutcome::Selected) {
                stats.winners += 1;
                match entrant.response {
                    Some(InvitationResponse::Accepted) => stats.accepted += 1,
                    Some(InvitationResponse::Declined) => stats.declined += 1,
                    None if entrant.status == EntrantStatus::Notified => {
                        stats.awaiting_response += 1
                    }
                    None => {}
                }
            }
        }
        stats.open_spots = event
            .capacity
            .saturating_sub(stats.winners - stats.declined);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evlot_model::{Coordinate, Geofence, Timestamp, UserId};

    fn ts(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn counts_each_stage() {
        let event = Event::new(
            "Chess",
            3,
            Geofence::new(Coordinate::new(0.0, 0.0), 100.0),
            ts(0),
            ts(10),
            UserId::new("org"),
        );
        let mut entrants = Vec::new();
        for i in 0..7 {
            let mut e = Entrant::new(event.id, UserId::new(format!("u{i}")), "E", ts(1));
            if i >= 1 {
                e.check_in(ts(2), None).unwrap();
            }
            if i >= 2 {
                let outcome = if i < 5 {
                    DrawOutcome::Selected
                } else {
                    DrawOutcome::NotSelected
                };
                e.record_outcome(outcome).unwrap();
            }
            if i >= 3 {
                e.mark_notified().unwrap();
            }
            if i == 3 {
                e.respond(InvitationResponse::Accepted, ts(5)).unwrap();
            }
            if i == 4 {
                e.respond(InvitationResponse::Declined, ts(5)).unwrap();
            }
            entrants.push(e);
        }

        let stats = EventStats::compute(&event, &entrants);
        assert_eq!(stats.total, 7);
        assert_eq!(stats.registered, 1);
        assert_eq!(stats.checked_in, 1);
        assert_eq!(stats.selected, 1);
        assert_eq!(stats.notified, 4);
        assert_eq!(stats.winners, 3);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.declined, 1);
        assert_eq!(stats.awaiting_response, 0);
        assert_eq!(stats.open_spots, 1);
    }
}
