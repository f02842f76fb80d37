//! Stats command implementation.

use super::snapshot::{parse_event_id, Snapshot};
use evlot_core::EventStats;
use serde::Serialize;
use std::path::Path;

/// Event statistics as printed by the CLI.
#[derive(Debug, Serialize)]
pub struct StatsResult {
    /// Event id.
    pub event_id: String,
    /// Event title.
    pub title: String,
    /// Number of places.
    pub capacity: u32,
    /// Waiting-list size.
    pub total: u32,
    /// Registered, not checked in.
    pub registered: u32,
    /// Checked in, not drawn.
    pub checked_in: u32,
    /// Drawn and selected, not yet notified.
    pub selected: u32,
    /// Drawn and not selected, not yet notified.
    pub not_selected: u32,
    /// Notified of their result.
    pub notified: u32,
    /// Winners of the draw.
    pub winners: u32,
    /// Winners who accepted.
    pub accepted: u32,
    /// Winners who declined.
    pub declined: u32,
    /// Notified winners yet to answer.
    pub awaiting_response: u32,
    /// Places not held by a winner.
    pub open_spots: u32,
    /// Whether the event has a draw record.
    pub drawn: bool,
}

impl StatsResult {
    fn new(event_id: String, title: String, stats: EventStats, drawn: bool) -> Self {
        Self {
            event_id,
            title,
            capacity: stats.capacity,
            total: stats.total,
            registered: stats.registered,
            checked_in: stats.checked_in,
            selected: stats.selected,
            not_selected: stats.not_selected,
            notified: stats.notified,
            winners: stats.winners,
            accepted: stats.accepted,
            declined: stats.declined,
            awaiting_response: stats.awaiting_response,
            open_spots: stats.open_spots,
            drawn,
        }
    }
}

/// Runs the stats command.
pub fn run(input: &Path, event: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = Snapshot::load(input)?;
    let result = execute(&snapshot, event)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Computes statistics for one event of a snapshot.
pub fn execute(
    snapshot: &Snapshot,
    event: &str,
) -> Result<StatsResult, Box<dyn std::error::Error>> {
    let event_id = parse_event_id(event)?;
    let event = snapshot.event(event_id)?;
    let entrants: Vec<_> = snapshot
        .entrants
        .iter()
        .filter(|e| e.event_id == event_id)
        .cloned()
        .collect();
    let drawn = snapshot.draws.iter().any(|d| d.event_id == event_id);
    Ok(StatsResult::new(
        event_id.to_string(),
        event.title.clone(),
        EventStats::compute(event, &entrants),
        drawn,
    ))
}

fn print_text_output(result: &StatsResult) {
    println!("Event: {} ({})", result.title, result.event_id);
    println!("  Capacity:          {}", result.capacity);
    println!("  Waiting list:      {}", result.total);
    println!("  Registered:        {}", result.registered);
    println!("  Checked in:        {}", result.checked_in);
    println!("  Drawn:             {}", if result.drawn { "yes" } else { "no" });
    println!();
    println!("Results:");
    println!("  Winners:           {}", result.winners);
    println!("  Accepted:          {}", result.accepted);
    println!("  Declined:          {}", result.declined);
    println!("  Awaiting response: {}", result.awaiting_response);
    println!("  Notified:          {}", result.notified);
    println!("  Open spots:        {}", result.open_spots);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::draw;
    use crate::commands::snapshot::tests::sample_snapshot;
    use evlot_testkit::START;

    #[test]
    fn counts_before_and_after_draw() {
        let snapshot = sample_snapshot(2, 3);
        let event = snapshot.events[0].id.to_string();

        let before = execute(&snapshot, &event).unwrap();
        assert_eq!(before.checked_in, 3);
        assert_eq!(before.open_spots, 2);
        assert!(!before.drawn);

        let event_id = snapshot.events[0].id;
        let (_, updated) = draw::execute(&snapshot, event_id, Some(5), Some(START)).unwrap();
        let after = execute(&updated, &event).unwrap();
        assert!(after.drawn);
        assert_eq!(after.winners, 2);
        assert_eq!(after.selected, 2);
        assert_eq!(after.not_selected, 1);
        assert_eq!(after.open_spots, 0);
    }

    #[test]
    fn unknown_event_fails() {
        let snapshot = sample_snapshot(1, 1);
        assert!(execute(&snapshot, "not-an-id").is_err());
        assert!(execute(&snapshot, &evlot_model::EventId::new().to_string()).is_err());
    }
}
