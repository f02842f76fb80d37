//! Export command implementation.

use super::snapshot::{parse_event_id, Snapshot};
use evlot_core::write_final_list;
use std::path::{Path, PathBuf};

/// Runs the export command.
pub fn run(input: &Path, event: &str, out_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = Snapshot::load(input)?;
    let path = execute(&snapshot, event, out_dir)?;
    println!("Final list written to {}", path.display());
    Ok(())
}

/// Writes the final list of one event into `out_dir`.
pub fn execute(
    snapshot: &Snapshot,
    event: &str,
    out_dir: &Path,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let event_id = parse_event_id(event)?;
    let event = snapshot.event(event_id)?;
    let entrants: Vec<_> = snapshot
        .entrants
        .iter()
        .filter(|e| e.event_id == event_id)
        .cloned()
        .collect();
    Ok(write_final_list(out_dir, event, &entrants)?)
}
