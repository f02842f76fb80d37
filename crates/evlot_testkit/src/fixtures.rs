//! Test fixtures and store helpers.
//!
//! A [`TestWorld`] is one simulated backend: a manual clock, an in-memory
//! remote and a token secret. Each call to [`TestWorld::store`] signs a
//! user in and returns that user's session store.

use evlot_model::{
    Coordinate, Document, Entrant, Event, Geofence, LocationSample, ManualClock, Timestamp,
    UserId,
};
use evlot_sync::{
    AuthConfig, MemoryRemote, RetryConfig, Session, SyncConfig, SyncStore, TokenIssuer,
    TokenValidator,
};
use std::sync::Arc;
use std::time::Duration;

/// Center of every fixture geofence.
pub const VENUE: Coordinate = Coordinate::new(53.5232, -113.5263);

/// Radius of every fixture geofence.
pub const FENCE_RADIUS_M: f64 = 500.0;

/// Secret shared by the fixture issuer and remote.
pub const TEST_SECRET: &[u8] = b"evlot-test-secret";

/// Start time of every fixture clock.
pub const START: Timestamp = Timestamp::from_millis(1_700_000_000_000);

/// Sync settings with fast, deterministic retries.
pub fn fast_sync_config() -> SyncConfig {
    SyncConfig::new().with_retry(
        RetryConfig::new(3)
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
            .with_jitter(false),
    )
}

/// A location sample `meters` due north of [`VENUE`].
pub fn sample_at(meters: f64, at: Timestamp) -> LocationSample {
    LocationSample::new(VENUE.offset_north(meters), 5.0, at)
}

/// An unpublished event around [`VENUE`] whose registration window spans
/// a week either side of `now`.
pub fn event_fixture(title: &str, capacity: u32, organizer: &str, now: Timestamp) -> Event {
    let week = Duration::from_secs(7 * 24 * 3600);
    Event::new(
        title,
        capacity,
        Geofence::new(VENUE, FENCE_RADIUS_M),
        now.saturating_sub(week),
        now.saturating_add(week),
        UserId::new(organizer),
    )
}

/// An entrant of `event` checked in `meters` north of [`VENUE`] at `at`.
pub fn checked_in_entrant(event: &Event, user: &str, meters: f64, at: Timestamp) -> Entrant {
    let mut entrant = Entrant::new(event.id, UserId::new(user), user, at)
        .with_email(format!("{user}@example.com"));
    entrant
        .check_in(at, Some(sample_at(meters, at)))
        .expect("fresh entrant checks in");
    entrant
}

/// A simulated backend.
pub struct TestWorld {
    /// Shared clock.
    pub clock: Arc<ManualClock>,
    /// Shared remote store.
    pub remote: Arc<MemoryRemote>,
    /// Token settings.
    pub auth: AuthConfig,
}

impl TestWorld {
    /// Creates a backend at [`START`].
    pub fn new() -> Self {
        let auth = AuthConfig::new(TEST_SECRET.to_vec());
        let clock = Arc::new(ManualClock::new(START));
        let remote = Arc::new(MemoryRemote::new(
            TokenValidator::new(auth.clone()),
            clock.clone(),
        ));
        Self {
            clock,
            remote,
            auth,
        }
    }

    /// Current time.
    pub fn now(&self) -> Timestamp {
        evlot_model::Clock::now(self.clock.as_ref())
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Signs `user` in.
    pub fn session(&self, user: &str) -> Session {
        TokenIssuer::new(self.auth.clone())
            .issue(&UserId::new(user), self.now())
            .expect("fixture user ids are valid")
    }

    /// Opens a session store for `user`.
    pub fn store(&self, user: &str) -> Arc<SyncStore> {
        self.store_with(user, fast_sync_config())
    }

    /// Opens a session store for `user` with `config`.
    pub fn store_with(&self, user: &str, config: SyncConfig) -> Arc<SyncStore> {
        Arc::new(SyncStore::new(
            config,
            self.remote.clone(),
            self.session(user),
            self.clock.clone(),
        ))
    }

    /// Creates and publishes an event owned by the store's user, then syncs.
    pub fn publish_event(&self, organizer: &SyncStore, capacity: u32) -> Event {
        let user = organizer.user_id().expect("store is open");
        let event =
            event_fixture("Community Swim", capacity, user.as_str(), self.now()).published();
        organizer.upsert(event.clone()).expect("fixture event is valid");
        organizer.sync().expect("fixture sync succeeds");
        event
    }

    /// Writes `count` checked-in entrants of `event` straight into the
    /// remote, each `meters` from the venue. Stores see them after a sync.
    pub fn seed_checked_in(&self, event: &Event, count: usize, meters: f64) -> Vec<Entrant> {
        (0..count)
            .map(|i| {
                let user = format!("entrant-{i}");
                let entrant = checked_in_entrant(event, &user, meters, self.now());
                self.remote
                    .seed(&Document::Entrant(entrant.clone()))
                    .expect("fixture entrant is valid");
                entrant
            })
            .collect()
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}
