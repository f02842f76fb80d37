//! Session-scoped entry point wiring the store, filter, engine and
//! dispatcher together.

use crate::config::CoordinatorConfig;
use crate::dispatcher::{Group, NotificationDispatcher, NotifyResult, PushGateway};
use crate::eligibility::{EligibilityFilter, Ineligibility};
use crate::engine::{LotteryEngine, Verification};
use crate::error::{LotteryError, LotteryResult};
use crate::export;
use crate::invitation;
use crate::registration::{self, CheckInOutcome, Registration};
use crate::stats::EventStats;
use evlot_model::{
    Clock, DrawOutcome, DrawRecord, Entrant, EntrantId, Event, EventId, InvitationResponse,
    LocationSample, QrPayload,
};
use evlot_sync::{RemoteStore, Session, SyncReport, SyncStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Everything one signed-in user needs to run lotteries.
///
/// Dropping the coordinator or calling [`logout`](Self::logout) ends the
/// session; the store is never shared between sessions.
pub struct LotteryCoordinator {
    store: Arc<SyncStore>,
    filter: EligibilityFilter,
    engine: LotteryEngine,
    dispatcher: Arc<NotificationDispatcher>,
}

impl LotteryCoordinator {
    /// Creates a coordinator over an existing store.
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<SyncStore>,
        gateway: Arc<dyn PushGateway>,
    ) -> Self {
        Self {
            filter: EligibilityFilter::new(config.eligibility),
            engine: LotteryEngine::new(Arc::clone(&store)),
            dispatcher: Arc::new(NotificationDispatcher::new(
                Arc::clone(&store),
                gateway,
                config.dispatch,
            )),
            store,
        }
    }

    /// Opens a new store for `session` and builds a coordinator on it.
    pub fn open(
        config: CoordinatorConfig,
        remote: Arc<dyn RemoteStore>,
        session: Session,
        clock: Arc<dyn Clock>,
        gateway: Arc<dyn PushGateway>,
    ) -> Self {
        let store = Arc::new(SyncStore::new(config.sync.clone(), remote, session, clock));
        Self::new(config, store, gateway)
    }

    /// The session's store.
    pub fn store(&self) -> &Arc<SyncStore> {
        &self.store
    }

    /// The eligibility filter.
    pub fn filter(&self) -> &EligibilityFilter {
        &self.filter
    }

    /// The draw engine.
    pub fn engine(&self) -> &LotteryEngine {
        &self.engine
    }

    /// The notification dispatcher.
    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    /// Runs a sync pass with retries.
    pub fn sync(&self) -> LotteryResult<SyncReport> {
        Ok(self.store.sync_with_retry()?)
    }

    /// Returns an event from the store.
    pub fn event(&self, event_id: EventId) -> LotteryResult<Event> {
        self.store
            .event(event_id)?
            .ok_or(LotteryError::EventNotFound(event_id))
    }

    /// Returns an entrant from the store.
    pub fn entrant(&self, entrant_id: EntrantId) -> LotteryResult<Entrant> {
        self.store
            .entrant(entrant_id)?
            .ok_or(LotteryError::EntrantNotFound(entrant_id))
    }

    // ------------------------------------------------------------------
    // Entrant flow
    // ------------------------------------------------------------------

    /// Joins the event's waiting list as the session user.
    pub fn register(
        &self,
        event_id: EventId,
        display_name: &str,
        email: Option<&str>,
    ) -> LotteryResult<Registration> {
        registration::register(&self.store, event_id, display_name, email)
    }

    /// Leaves the event's waiting list before checking in.
    pub fn leave(&self, event_id: EventId) -> LotteryResult<Entrant> {
        registration::leave(&self.store, event_id)
    }

    /// Checks in from a decoded QR payload.
    pub fn check_in(
        &self,
        payload: &QrPayload,
        sample: Option<LocationSample>,
    ) -> LotteryResult<CheckInOutcome> {
        registration::check_in(&self.store, payload, sample)
    }

    /// Checks in from scanned QR text.
    pub fn check_in_scan(
        &self,
        scanned: &str,
        sample: Option<LocationSample>,
    ) -> LotteryResult<CheckInOutcome> {
        let payload = QrPayload::parse(scanned)?;
        self.check_in(&payload, sample)
    }

    /// Opts an entrant in or out of result notifications.
    pub fn set_notifications(
        &self,
        entrant_id: EntrantId,
        enabled: bool,
    ) -> LotteryResult<Entrant> {
        registration::set_notifications(&self.store, entrant_id, enabled)
    }

    /// Answers a winning invitation.
    pub async fn respond(
        &self,
        entrant_id: EntrantId,
        response: InvitationResponse,
    ) -> LotteryResult<Entrant> {
        invitation::respond(&self.store, &self.dispatcher, entrant_id, response).await
    }

    // ------------------------------------------------------------------
    // Organizer flow
    // ------------------------------------------------------------------

    /// Entrants of the event eligible at the store's current time.
    pub fn eligible_pool(&self, event_id: EventId) -> LotteryResult<Vec<EntrantId>> {
        let event = self.event(event_id)?;
        let entrants = self.store.entrants_of(event_id)?;
        Ok(self.filter.eligible_pool(&event, &entrants, self.store.now()))
    }

    /// Why an entrant is not eligible, if it is not.
    pub fn explain(
        &self,
        event_id: EventId,
        entrant_id: EntrantId,
    ) -> LotteryResult<Result<(), Ineligibility>> {
        let event = self.event(event_id)?;
        let entrant = self.entrant(entrant_id)?;
        Ok(self.filter.explain(&event, &entrant, self.store.now()))
    }

    /// Draws the event's winners from its eligible pool with `seed`.
    pub fn run_draw(&self, event_id: EventId, seed: u64) -> LotteryResult<DrawRecord> {
        let event = self.event(event_id)?;
        let pool = self.eligible_pool(event_id)?;
        self.engine.draw(&event, &pool, seed)
    }

    /// Draws with a fresh random seed.
    pub fn run_draw_random(&self, event_id: EventId) -> LotteryResult<DrawRecord> {
        self.run_draw(event_id, rand::random())
    }

    /// Replays the event's stored draw.
    pub fn verify(&self, event_id: EventId) -> LotteryResult<Verification> {
        self.event(event_id)?;
        self.engine
            .verify_event(event_id)?
            .ok_or(LotteryError::NoDrawRecord(event_id))
    }

    /// Notifies every entrant of the draw and waits for the result.
    pub async fn notify(&self, record: &DrawRecord) -> NotifyResult {
        self.dispatcher.notify(record).await
    }

    /// Notifies the entrants of the event's stored draw.
    pub async fn notify_event(&self, event_id: EventId) -> LotteryResult<NotifyResult> {
        self.event(event_id)?;
        let record = self
            .store
            .draw(event_id)?
            .ok_or(LotteryError::NoDrawRecord(event_id))?;
        Ok(self.dispatcher.notify(&record).await)
    }

    /// Sends an organizer's message to the selected or waitlisted entrants.
    pub async fn notify_group(
        &self,
        event_id: EventId,
        group: Group,
        message: &str,
    ) -> LotteryResult<NotifyResult> {
        self.dispatcher.notify_group(event_id, group, message).await
    }

    /// Hands the record to a background task so the draw path never waits
    /// on push delivery.
    pub fn spawn_notify(&self, record: DrawRecord) -> JoinHandle<NotifyResult> {
        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(async move { dispatcher.notify(&record).await })
    }

    /// Changes an event's capacity.
    ///
    /// Fails with [`LotteryError::CapacityBelowSelected`] when fewer places
    /// would remain than winners still holding one.
    pub fn update_capacity(&self, event_id: EventId, capacity: u32) -> LotteryResult<Event> {
        let mut event = self.event(event_id)?;
        let holding = self
            .store
            .entrants_of(event_id)?
            .iter()
            .filter(|e| {
                e.outcome == Some(DrawOutcome::Selected)
                    && e.response != Some(InvitationResponse::Declined)
            })
            .count() as u32;
        if capacity < holding {
            return Err(LotteryError::CapacityBelowSelected {
                requested: capacity,
                selected: holding,
            });
        }
        if event.capacity != capacity {
            event.capacity = capacity;
            self.store.upsert(event.clone())?;
            info!(event = %event_id, capacity, "capacity updated");
        }
        Ok(event)
    }

    /// Statistics for an event.
    pub fn stats(&self, event_id: EventId) -> LotteryResult<EventStats> {
        let event = self.event(event_id)?;
        let entrants = self.store.entrants_of(event_id)?;
        Ok(EventStats::compute(&event, &entrants))
    }

    /// The final list as CSV.
    pub fn final_list_csv(&self, event_id: EventId) -> LotteryResult<String> {
        let event = self.event(event_id)?;
        let entrants = self.store.entrants_of(event_id)?;
        Ok(export::final_list_csv(&event, &entrants))
    }

    /// Writes the final list into `dir`.
    pub fn export_final_list(&self, event_id: EventId, dir: &Path) -> LotteryResult<PathBuf> {
        let event = self.event(event_id)?;
        let entrants = self.store.entrants_of(event_id)?;
        export::write_final_list(dir, &event, &entrants)
            .map_err(|e| LotteryError::Export(e.to_string()))
    }

    /// Ends the session and clears the store.
    pub fn logout(&self) {
        self.store.close();
    }
}
