//! Verify command implementation.

use super::snapshot::{parse_event_id, Snapshot};
use evlot_core::verify;
use evlot_model::{DrawRecord, EventId};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// A file holding either one draw record or a whole snapshot.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecordFile {
    Single(DrawRecord),
    Snapshot(Snapshot),
}

/// Outcome of replaying one record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordCheck {
    /// Event of the record.
    pub event_id: EventId,
    /// Problems found; empty if the record is authentic.
    pub errors: Vec<String>,
}

impl RecordCheck {
    /// Returns true if nothing was wrong.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path, event: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let event_id = event.map(parse_event_id).transpose()?;
    let checks = execute(path, event_id)?;
    if checks.is_empty() {
        return Err(format!("no draw records in {}", path.display()).into());
    }

    println!("Verifying draws in {}", path.display());
    let mut failed = 0;
    for check in &checks {
        if check.is_valid() {
            println!("  {}: OK", check.event_id);
        } else {
            failed += 1;
            println!("  {}: FAILED", check.event_id);
            for error in &check.errors {
                println!("    ERROR: {error}");
            }
        }
    }

    if failed > 0 {
        return Err(format!("{failed} of {} draw records failed verification", checks.len()).into());
    }
    println!("All {} draw records verified", checks.len());
    Ok(())
}

/// Replays every draw record in `path`, or only `event_id`'s.
pub fn execute(
    path: &Path,
    event_id: Option<EventId>,
) -> Result<Vec<RecordCheck>, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(path)?;
    let records = match serde_json::from_str::<RecordFile>(&text)? {
        RecordFile::Single(record) => vec![record],
        RecordFile::Snapshot(snapshot) => snapshot.draws,
    };
    Ok(records
        .iter()
        .filter(|r| event_id.map_or(true, |id| r.event_id == id))
        .map(check)
        .collect())
}

fn check(record: &DrawRecord) -> RecordCheck {
    let mut errors = Vec::new();
    if let Err(e) = record.validate() {
        errors.push(e.to_string());
    }
    let replay = verify(record);
    if !replay.digest_matches {
        errors.push("pool digest does not match the pool".to_string());
    }
    if !replay.selection_matches {
        errors.push(format!(
            "replaying seed {} selects {} entrants that differ from the record",
            record.seed,
            replay.replayed.len()
        ));
    }
    RecordCheck {
        event_id: record.event_id,
        errors,
    }
}
