//! Check-in QR payloads.
//!
//! The code printed at the venue encodes the event and the entrant's
//! registration as `evlot:checkin:<event-uuid>:<entrant-uuid>`.

use crate::error::{ModelError, ModelResult};
use crate::id::{EntrantId, EventId};
use std::fmt;
use std::str::FromStr;

const PREFIX: &str = "evlot:checkin:";

/// Decoded contents of a check-in QR code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QrPayload {
    /// Event being checked into.
    pub event_id: EventId,
    /// Registration checking in.
    pub entrant_id: EntrantId,
}

impl QrPayload {
    /// Creates a payload.
    pub fn new(event_id: EventId, entrant_id: EntrantId) -> Self {
        Self {
            event_id,
            entrant_id,
        }
    }

    /// Parses scanned text.
    pub fn parse(text: &str) -> ModelResult<Self> {
        let rest = text
            .trim()
            .strip_prefix(PREFIX)
            .ok_or_else(|| ModelError::InvalidQrPayload(format!("missing prefix in {text:?}")))?;
        let (event, entrant) = rest
            .split_once(':')
            .ok_or_else(|| ModelError::InvalidQrPayload(format!("missing entrant in {text:?}")))?;
        let event_id = event
            .parse()
            .map_err(|_| ModelError::InvalidQrPayload(format!("bad event id {event:?}")))?;
        let entrant_id = entrant
            .parse()
            .map_err(|_| ModelError::InvalidQrPayload(format!("bad entrant id {entrant:?}")))?;
        Ok(Self {
            event_id,
            entrant_id,
        })
    }
}

impl fmt::Display for QrPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}:{}", self.event_id, self.entrant_id)
    }
}

impl FromStr for QrPayload {
    type Err = ModelError;

    fn from_str(s: &str) -> ModelResult<Self> {
        Self::parse(s)
    }
}
