//! # EVLOT Testkit
//!
//! Test utilities for EVLOT.
//!
//! This crate provides:
//! - `TestWorld`: a manual clock, an in-memory remote and session stores
//! - Event and entrant fixtures at known distances from a geofence
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use evlot_testkit::prelude::*;
//!
//! let world = TestWorld::new();
//! let organizer = world.store("organizer");
//! let event = world.publish_event(&organizer, 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
