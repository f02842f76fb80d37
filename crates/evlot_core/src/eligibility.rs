//! Draw eligibility.
//!
//! An entrant may enter the draw when all of these hold at time `now`:
//! - it belongs to the event and is `CheckedIn`
//! - `now` lies inside the registration window
//! - the check-in location lies inside the geofence
//! - that location sample was fresh at check-in, not dated after it, and
//!   accurate enough

use crate::config::EligibilityConfig;
use evlot_model::{Entrant, EntrantId, EntrantStatus, Event, EventId, Timestamp};
use std::fmt;
use std::time::Duration;

/// The first rule an entrant fails.
#[derive(Debug, Clone, PartialEq)]
pub enum Ineligibility {
    /// The entrant registered for another event.
    WrongEvent {
        /// Event the entrant belongs to.
        entrant_event: EventId,
    },
    /// The entrant is not in `CheckedIn`.
    NotCheckedIn {
        /// Current status.
        status: EntrantStatus,
    },
    /// `now` is outside the registration window.
    OutsideWindow {
        /// The time checked.
        now: Timestamp,
    },
    /// No location was recorded at check-in.
    NoLocation,
    /// The check-in location is outside the geofence.
    OutsideGeofence {
        /// Distance from the center.
        distance_m: f64,
        /// Geofence radius.
        radius_m: f64,
    },
    /// The sample was too old when the entrant checked in.
    StaleSample {
        /// Age of the sample at check-in.
        age: Duration,
    },
    /// The sample is dated after the check-in, beyond the skew tolerance.
    FutureSample {
        /// How far the sample is ahead of the check-in.
        ahead: Duration,
    },
    /// The sample's accuracy radius is too large.
    InaccurateSample {
        /// Reported accuracy.
        accuracy_m: f64,
    },
}

impl fmt::Display for Ineligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ineligibility::WrongEvent { entrant_event } => {
                write!(f, "registered for event {entrant_event}")
            }
            Ineligibility::NotCheckedIn { status } => write!(f, "status is {status}"),
            Ineligibility::OutsideWindow { now } => {
                write!(f, "{now} is outside the registration window")
            }
            Ineligibility::NoLocation => f.write_str("no check-in location"),
            Ineligibility::OutsideGeofence {
                distance_m,
                radius_m,
            } => write!(f, "{distance_m:.0} m from center, radius {radius_m:.0} m"),
            Ineligibility::StaleSample { age } => {
                write!(f, "location sample was {}s old", age.as_secs())
            }
            Ineligibility::FutureSample { ahead } => {
                write!(f, "location sample is dated {}ms after check-in", ahead.as_millis())
            }
            Ineligibility::InaccurateSample { accuracy_m } => {
                write!(f, "location accuracy {accuracy_m:.0} m")
            }
        }
    }
}

/// Pure eligibility predicate.
#[derive(Debug, Clone, Default)]
pub struct EligibilityFilter {
    config: EligibilityConfig,
}

impl EligibilityFilter {
    /// Creates a filter.
    pub fn new(config: EligibilityConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EligibilityConfig {
        &self.config
    }

    /// Returns true if `entrant` may enter the draw for `event` at `now`.
    pub fn eligible(&self, event: &Event, entrant: &Entrant, now: Timestamp) -> bool {
        self.explain(event, entrant, now).is_ok()
    }

    /// Returns the first rule `entrant` fails.
    pub fn explain(
        &self,
        event: &Event,
        entrant: &Entrant,
        now: Timestamp,
    ) -> Result<(), Ineligibility> {
        if entrant.event_id != event.id {
            return Err(Ineligibility::WrongEvent {
                entrant_event: entrant.event_id,
            });
        }
        if entrant.status != EntrantStatus::CheckedIn {
            return Err(Ineligibility::NotCheckedIn {
                status: entrant.status,
            });
        }
        if !event.is_registration_open(now) {
            return Err(Ineligibility::OutsideWindow { now });
        }

        let (Some(sample), Some(checked_in_at)) =
            (entrant.check_in_location.as_ref(), entrant.checked_in_at)
        else {
            return Err(Ineligibility::NoLocation);
        };

        let distance_m = event.geofence.center.distance_m(&sample.coordinate);
        if distance_m > event.geofence.radius_m {
            return Err(Ineligibility::OutsideGeofence {
                distance_m,
                radius_m: event.geofence.radius_m,
            });
        }

        if sample.timestamp > checked_in_at.saturating_add(self.config.max_clock_skew) {
            return Err(Ineligibility::FutureSample {
                ahead: sample.timestamp.since(checked_in_at),
            });
        }
        let age = checked_in_at.since(sample.timestamp);
        if age > self.config.max_sample_age {
            return Err(Ineligibility::StaleSample { age });
        }

        if let Some(max) = self.config.max_accuracy_m {
            if sample.accuracy_m > max {
                return Err(Ineligibility::InaccurateSample {
                    accuracy_m: sample.accuracy_m,
                });
            }
        }

        Ok(())
    }

    /// Returns the ids of eligible entrants, ordered by id.
    pub fn eligible_pool(
        &self,
        event: &Event,
        entrants: &[Entrant],
        now: Timestamp,
    ) -> Vec<EntrantId> {
        let mut pool: Vec<EntrantId> = entrants
            .iter()
            .filter(|entrant| self.eligible(event, entrant, now))
            .map(|entrant| entrant.id)
            .collect();
        pool.sort();
        pool.dedup();
        pool
    }
}
