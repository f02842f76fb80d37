//! Draw command implementation.

use super::snapshot::{parse_event_id, Snapshot};
use evlot_model::{DrawRecord, EntrantId, EventId, Timestamp};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Runs the draw command.
pub fn run(
    input: &Path,
    event: &str,
    seed: Option<u64>,
    at: Option<u64>,
    output: Option<&Path>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = Snapshot::load(input)?;
    let event_id = parse_event_id(event)?;
    let (record, updated) = execute(&snapshot, event_id, seed, at.map(Timestamp::from_millis))?;

    if let Some(path) = output {
        updated.save(path)?;
        info!(path = %path.display(), "updated snapshot written");
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&record)?),
        _ => print_text_output(&record, &updated),
    }
    Ok(())
}

/// Draws the event's winners from a snapshot.
///
/// Returns the record and the snapshot with outcomes applied.
pub fn execute(
    snapshot: &Snapshot,
    event_id: EventId,
    seed: Option<u64>,
    at: Option<Timestamp>,
) -> Result<(DrawRecord, Snapshot), Box<dyn std::error::Error>> {
    let coordinator = snapshot.open(event_id, at)?;
    let record = match seed {
        Some(seed) => coordinator.run_draw(event_id, seed)?,
        None => coordinator.run_draw_random(event_id)?,
    };
    let updated = Snapshot::from_store(coordinator.store())?;
    coordinator.logout();
    Ok((record, updated))
}

fn print_text_output(record: &DrawRecord, snapshot: &Snapshot) {
    let names: HashMap<EntrantId, &str> = snapshot
        .entrants
        .iter()
        .map(|e| (e.id, e.display_name.as_str()))
        .collect();
    let name = |id: &EntrantId| names.get(id).copied().unwrap_or("?").to_string();

    println!("Draw for event {}", record.event_id);
    println!("  Seed:     {}", record.seed);
    println!("  Capacity: {}", record.capacity);
    println!("  Pool:     {} entrants", record.pool.len());
    println!("  Digest:   {}", record.pool_digest);
    println!();
    println!("Selected ({}):", record.selected.len());
    for id in &record.selected {
        println!("  {} {}", id, name(id));
    }
    let rest = record.not_selected();
    println!("Not selected ({}):", rest.len());
    for id in &rest {
        println!("  {} {}", id, name(id));
    }
}
