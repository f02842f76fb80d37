//! CLI command implementations.

pub mod draw;
pub mod export;
pub mod snapshot;
pub mod stats;
pub mod token;
pub mod verify;
