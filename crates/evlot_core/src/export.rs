//! CSV export of an event's final list.
//!
//! The final list holds the winners who accepted their invitation.

use evlot_model::{Entrant, Event, InvitationResponse};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// CSV header row.
pub const FINAL_LIST_HEADER: &str = "Entrant Name,Email";

/// File name for an event's final list, e.g. `Spring_Gala_final_list.csv`.
pub fn export_file_name(event_title: &str) -> String {
    format!("{}_final_list.csv", event_title.replace(' ', "_"))
}

/// Entrants of `event` who accepted, in the given order.
pub fn final_list<'a>(event: &Event, entrants: &'a [Entrant]) -> Vec<&'a Entrant> {
    entrants
        .iter()
        .filter(|e| e.event_id == event.id && e.response == Some(InvitationResponse::Accepted))
        .collect()
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Renders the final list as CSV with CRLF line endings.
pub fn final_list_csv(event: &Event, entrants: &[Entrant]) -> String {
    let mut out = String::from(FINAL_LIST_HEADER);
    out.push_str("\r\n");
    for entrant in final_list(event, entrants) {
        out.push_str(&csv_field(&entrant.display_name));
        out.push(',');
        out.push_str(&csv_field(entrant.email.as_deref().unwrap_or("")));
        out.push_str("\r\n");
    }
    out
}

/// Writes the final list into `dir` and returns the file path.
pub fn write_final_list(dir: &Path, event: &Event, entrants: &[Entrant]) -> io::Result<PathBuf> {
    let path = dir.join(export_file_name(&event.title));
    let csv = final_list_csv(event, entrants);
    fs::write(&path, csv)?;
    info!(event = %event.id, path = %path.display(), "final list exported");
    Ok(path)
}
