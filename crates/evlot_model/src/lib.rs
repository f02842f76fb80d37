//! # EVLOT Model
//!
//! Documents and domain rules for the EVLOT event lottery.
//!
//! This crate provides:
//! - Typed identifiers (`EventId`, `EntrantId`, `NotificationId`, `UserId`)
//! - Millisecond timestamps and an injectable [`Clock`]
//! - Geofences and location samples with haversine distances
//! - Event, entrant, draw and notification records
//! - The [`Document`] union addressed by [`DocKey`]
//! - A CBOR field-map codec used for field-level merging
//! - Check-in QR payloads
//!
//! ## Key Invariants
//!
//! - Entrant status only moves forward and `Notified` is terminal
//! - A published event only allows its capacity to change
//! - Draw records are immutable once written
//! - Every document read from outside is validated before use
//!
//! The crate performs no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod document;
mod draw;
mod entrant;
mod error;
mod event;
mod geo;
mod id;
mod notification;
mod qr;
mod time;

pub use codec::{changed_fields, decode, encode, from_fields, to_fields, FieldMap};
pub use document::{Collection, DocKey, Document};
pub use draw::{pool_digest, DrawRecord};
pub use entrant::{DrawOutcome, Entrant, EntrantStatus, InvitationResponse};
pub use error::{ModelError, ModelResult};
pub use event::Event;
pub use geo::{Coordinate, Geofence, LocationSample, EARTH_RADIUS_M};
pub use id::{EntrantId, EventId, NotificationId, UserId};
pub use notification::{Audience, NotificationKind, NotificationRecord};
pub use qr::QrPayload;
pub use time::{Clock, ManualClock, SystemClock, Timestamp};

/// Re-exported so callers can build field maps without naming ciborium.
pub use ciborium::Value as FieldValue;
