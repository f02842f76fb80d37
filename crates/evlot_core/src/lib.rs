//! # EVLOT Core
//!
//! Lottery logic on top of the sync store.
//!
//! This crate provides:
//! - `EligibilityFilter`, the geofence and check-in predicate
//! - `LotteryEngine`, seeded single-shot draws with replayable audit records
//! - `NotificationDispatcher`, idempotent result delivery with bounded retry
//! - Registration, QR check-in, invitation answers, statistics and CSV export
//! - `LotteryCoordinator`, the session-scoped entry point
//!
//! ## Key Invariants
//!
//! - Entrant status only moves forward
//! - At most one draw record per event; records never change
//! - Only the dispatcher moves entrants to `Notified`
//! - Notification never blocks or fails a draw

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod dispatcher;
mod eligibility;
mod engine;
mod error;
mod export;
mod invitation;
mod registration;
mod stats;

pub use config::{CoordinatorConfig, DispatchConfig, EligibilityConfig};
pub use coordinator::LotteryCoordinator;
pub use dispatcher::{
    result_message, DeliveryFailure, DeliveryState, Group, MemoryGateway, Notice,
    NotificationDispatcher, NotifyResult, PushError, PushGateway, PushMessage, PushTarget,
    NOT_SELECTED_TITLE, SELECTED_TITLE, WAITLIST_TITLE,
};
pub use eligibility::{EligibilityFilter, Ineligibility};
pub use engine::{select_winners, verify, LotteryEngine, Verification};
pub use error::{AlreadyDrawnError, LotteryError, LotteryResult};
pub use export::{export_file_name, final_list, final_list_csv, write_final_list, FINAL_LIST_HEADER};
pub use invitation::{organizer_notice, respond};
pub use registration::{
    check_in, leave, register, set_notifications, CheckInOutcome, Registration,
};
pub use stats::EventStats;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
