//! Result notification.
//!
//! The dispatcher reads a persisted [`DrawRecord`] and tells every pool
//! entrant the result through a [`PushGateway`]. It owns the `Notified`
//! transition: an entrant moves there only after a delivery succeeded (or
//! was suppressed because the entrant opted out), which makes repeated
//! calls safe.
//!
//! Delivery failures never surface as errors. Transient failures and
//! timeouts are retried with backoff; whatever still fails is listed in
//! [`NotifyResult::failed`].

use crate::config::DispatchConfig;
use crate::error::{LotteryError, LotteryResult};
use async_trait::async_trait;
use evlot_model::{
    DrawOutcome, DrawRecord, Entrant, EntrantId, EntrantStatus, EventId, InvitationResponse,
    NotificationKind, NotificationRecord, Timestamp, UserId,
};
use evlot_sync::SyncStore;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Where a push message goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PushTarget {
    /// A device registration token.
    Token(String),
    /// A topic devices subscribe to.
    Topic(String),
}

impl PushTarget {
    /// The per-entrant topic `entrant-<id>`.
    pub fn entrant_topic(id: EntrantId) -> Self {
        PushTarget::Topic(format!("entrant-{id}"))
    }

    /// The per-user topic `user-<id>`.
    pub fn user_topic(user: &UserId) -> Self {
        PushTarget::Topic(format!("user-{user}"))
    }

    /// The entrant's device token, or its topic when none is registered.
    pub fn for_entrant(entrant: &Entrant) -> Self {
        match &entrant.push_token {
            Some(token) if !token.is_empty() => PushTarget::Token(token.clone()),
            _ => PushTarget::entrant_topic(entrant.id),
        }
    }
}

impl fmt::Display for PushTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushTarget::Token(token) => write!(f, "token:{token}"),
            PushTarget::Topic(topic) => write!(f, "topic:{topic}"),
        }
    }
}

/// A push message.
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    /// Destination.
    pub target: PushTarget,
    /// Notification title.
    pub title: String,
    /// Notification body.
    pub body: String,
    /// Key/value payload for the app.
    pub data: BTreeMap<String, String>,
}

impl PushMessage {
    /// Creates a message without payload.
    pub fn new(target: PushTarget, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            target,
            title: title.into(),
            body: body.into(),
            data: BTreeMap::new(),
        }
    }

    /// Adds a payload entry.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// A failed push.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// May succeed if retried.
    #[error("transient push failure: {0}")]
    Transient(String),
    /// Will not succeed, e.g. an unregistered token.
    #[error("permanent push failure: {0}")]
    Permanent(String),
}

impl PushError {
    /// Returns true for [`PushError::Transient`].
    pub fn is_transient(&self) -> bool {
        matches!(self, PushError::Transient(_))
    }
}

/// Push messaging service.
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Sends one message.
    async fn send(&self, message: &PushMessage) -> Result<(), PushError>;
}

/// In-process gateway that records messages.
///
/// Failures and delays can be scripted per target.
#[derive(Default)]
pub struct MemoryGateway {
    sent: Mutex<Vec<PushMessage>>,
    failures: Mutex<HashMap<PushTarget, VecDeque<PushError>>>,
    delays: Mutex<HashMap<PushTarget, Duration>>,
}

impl MemoryGateway {
    /// Creates an empty gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next sends to `target` fail with `errors`, in order.
    pub fn fail(&self, target: PushTarget, errors: impl IntoIterator<Item = PushError>) {
        self.failures
            .lock()
            .entry(target)
            .or_default()
            .extend(errors);
    }

    /// Delays every send to `target`.
    pub fn delay(&self, target: PushTarget, delay: Duration) {
        self.delays.lock().insert(target, delay);
    }

    /// Returns the delivered messages.
    pub fn sent(&self) -> Vec<PushMessage> {
        self.sent.lock().clone()
    }

    /// Returns the messages delivered to `target`.
    pub fn sent_to(&self, target: &PushTarget) -> Vec<PushMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|m| &m.target == target)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PushGateway for MemoryGateway {
    async fn send(&self, message: &PushMessage) -> Result<(), PushError> {
        let delay = self.delays.lock().get(&message.target).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self
            .failures
            .lock()
            .get_mut(&message.target)
            .and_then(VecDeque::pop_front);
        if let Some(err) = failure {
            return Err(err);
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

/// Delivery state of one entrant's result.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryState {
    /// The result was delivered.
    Delivered {
        /// When.
        at: Timestamp,
    },
    /// The entrant opted out; nothing was sent.
    Suppressed,
    /// A notification pass is delivering the result right now.
    InFlight,
    /// Every attempt failed.
    Failed {
        /// Attempts made.
        attempts: u32,
        /// Last error.
        error: String,
    },
}

/// A delivery that did not succeed.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryFailure {
    /// The entrant.
    pub entrant_id: EntrantId,
    /// Attempts made.
    pub attempts: u32,
    /// Last error.
    pub error: String,
}

/// Outcome of [`NotificationDispatcher::notify`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotifyResult {
    /// Entrants told their result by this call.
    pub delivered: Vec<EntrantId>,
    /// Entrants that were already notified.
    pub skipped: Vec<EntrantId>,
    /// Opted-out entrants marked notified without a push.
    pub suppressed: Vec<EntrantId>,
    /// Entrants whose delivery failed.
    pub failed: Vec<DeliveryFailure>,
}

impl NotifyResult {
    /// Returns true if nothing failed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Ids of the failed entrants.
    pub fn failed_ids(&self) -> Vec<EntrantId> {
        self.failed.iter().map(|f| f.entrant_id).collect()
    }
}

/// A notice to a single user.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    /// Recipient.
    pub recipient: UserId,
    /// Where to push.
    pub target: PushTarget,
    /// Entrant the notice concerns.
    pub entrant_id: Option<EntrantId>,
    /// Event the notice concerns.
    pub event_id: EventId,
    /// Notification kind.
    pub kind: NotificationKind,
    /// Title.
    pub title: String,
    /// Body.
    pub message: String,
}

/// Entrants an organizer can message at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    /// Winners still holding a place.
    Selected,
    /// Everyone on the waiting list without a place.
    Waitlisted,
}

impl Group {
    /// Returns true if `entrant` belongs to the group.
    pub fn contains(self, entrant: &Entrant) -> bool {
        let winner = entrant.outcome == Some(DrawOutcome::Selected);
        match self {
            Group::Selected => winner && entrant.response != Some(InvitationResponse::Declined),
            Group::Waitlisted => !winner,
        }
    }

    /// Title of messages to the group.
    pub fn title(self) -> &'static str {
        match self {
            Group::Selected => SELECTED_TITLE,
            Group::Waitlisted => WAITLIST_TITLE,
        }
    }
}

/// Title of the winner message.
pub const SELECTED_TITLE: &str = "Lottery Selection";
/// Title of organizer messages to the waiting list.
pub const WAITLIST_TITLE: &str = "Lottery Results";
/// Title of the message to entrants who were not drawn.
pub const NOT_SELECTED_TITLE: &str = "Lottery Results - Not Selected";

/// Title and body of the result message for `outcome`.
pub fn result_message(outcome: DrawOutcome, event_title: &str) -> (String, String) {
    match outcome {
        DrawOutcome::Selected => (
            SELECTED_TITLE.to_string(),
            format!("Congratulations! You've been selected for {event_title}"),
        ),
        DrawOutcome::NotSelected => (
            NOT_SELECTED_TITLE.to_string(),
            format!(
                "The lottery draw for {event_title} has been completed. Unfortunately, you were \
                 not selected in this lottery draw. You remain on the waiting list in case spots \
                 become available."
            ),
        ),
    }
}

fn outcome_kind(outcome: DrawOutcome) -> NotificationKind {
    match outcome {
        DrawOutcome::Selected => NotificationKind::Selected,
        DrawOutcome::NotSelected => NotificationKind::NotSelected,
    }
}

enum Attempt {
    Sent,
    Suppressed,
}

/// Sends draw results and notices.
pub struct NotificationDispatcher {
    store: Arc<SyncStore>,
    gateway: Arc<dyn PushGateway>,
    config: DispatchConfig,
    ledger: Mutex<HashMap<EntrantId, DeliveryState>>,
}

impl NotificationDispatcher {
    /// Creates a dispatcher.
    pub fn new(
        store: Arc<SyncStore>,
        gateway: Arc<dyn PushGateway>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
            ledger: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the delivery state recorded for `entrant_id`.
    pub fn delivery_state(&self, entrant_id: EntrantId) -> Option<DeliveryState> {
        self.ledger.lock().get(&entrant_id).cloned()
    }

    fn already_delivered(&self, entrant_id: EntrantId) -> bool {
        matches!(
            self.ledger.lock().get(&entrant_id),
            Some(DeliveryState::Delivered { .. } | DeliveryState::Suppressed)
        )
    }

    /// Marks `entrant_id` in flight unless another pass holds or finished it.
    fn claim(&self, entrant_id: EntrantId) -> bool {
        let mut ledger = self.ledger.lock();
        match ledger.get(&entrant_id) {
            Some(
                DeliveryState::Delivered { .. }
                | DeliveryState::Suppressed
                | DeliveryState::InFlight,
            ) => false,
            _ => {
                ledger.insert(entrant_id, DeliveryState::InFlight);
                true
            }
        }
    }

    /// Tells every pool entrant of `record` its result.
    ///
    /// Entrants already notified, or being notified by an overlapping pass,
    /// are skipped, so calling this again only retries the ones that failed.
    pub async fn notify(&self, record: &DrawRecord) -> NotifyResult {
        let mut result = NotifyResult::default();
        let event_title = match self.store.event(record.event_id) {
            Ok(Some(event)) => event.title,
            Ok(None) => {
                warn!(event = %record.event_id, "notifying for an event missing from the store");
                "your event".to_string()
            }
            Err(e) => {
                warn!(event = %record.event_id, error = %e, "cannot read event");
                for id in &record.pool {
                    result.failed.push(DeliveryFailure {
                        entrant_id: *id,
                        attempts: 0,
                        error: e.to_string(),
                    });
                }
                return result;
            }
        };

        for &entrant_id in &record.pool {
            if self.already_delivered(entrant_id) {
                result.skipped.push(entrant_id);
                continue;
            }
            let Some(outcome) = record.outcome_for(&entrant_id) else {
                continue;
            };
            let entrant = match self.store.entrant(entrant_id) {
                Ok(Some(entrant)) => entrant,
                Ok(None) => {
                    result.failed.push(self.fail(entrant_id, 0, "entrant not found".into()));
                    continue;
                }
                Err(e) => {
                    result.failed.push(self.fail(entrant_id, 0, e.to_string()));
                    continue;
                }
            };
            if entrant.status == EntrantStatus::Notified {
                debug!(entrant = %entrant_id, "already notified");
                result.skipped.push(entrant_id);
                continue;
            }
            if !self.claim(entrant_id) {
                debug!(entrant = %entrant_id, "delivery claimed by another pass");
                result.skipped.push(entrant_id);
                continue;
            }

            match self.deliver_result(entrant, outcome, record, &event_title).await {
                Ok(Attempt::Sent) => result.delivered.push(entrant_id),
                Ok(Attempt::Suppressed) => result.suppressed.push(entrant_id),
                Err(failure) => result.failed.push(failure),
            }
        }

        info!(
            event = %record.event_id,
            delivered = result.delivered.len(),
            skipped = result.skipped.len(),
            suppressed = result.suppressed.len(),
            failed = result.failed.len(),
            "notification pass complete"
        );
        result
    }

    async fn deliver_result(
        &self,
        mut entrant: Entrant,
        outcome: DrawOutcome,
        record: &DrawRecord,
        event_title: &str,
    ) -> Result<Attempt, DeliveryFailure> {
        let entrant_id = entrant.id;
        if entrant.status == EntrantStatus::CheckedIn {
            entrant
                .record_outcome(outcome)
                .map_err(|e| self.fail(entrant_id, 0, e.to_string()))?;
        }

        let attempt = if entrant.notifications_enabled {
            let (title, body) = result_message(outcome, event_title);
            let message = PushMessage::new(PushTarget::for_entrant(&entrant), &title, &body)
                .with_data("eventId", record.event_id.to_string())
                .with_data("entrantId", entrant_id.to_string());
            if let Err((attempts, error)) = self.send_with_retry(&message).await {
                warn!(entrant = %entrant_id, attempts, %error, "result delivery failed");
                return Err(self.fail(entrant_id, attempts, error.to_string()));
            }

            let log = NotificationRecord::new(
                entrant.user_id.clone(),
                Some(entrant_id),
                record.event_id,
                outcome_kind(outcome),
                title,
                body,
                self.store.now(),
            );
            if let Err(e) = self.store.upsert(log) {
                warn!(entrant = %entrant_id, error = %e, "could not store notification record");
            }
            Attempt::Sent
        } else {
            debug!(entrant = %entrant_id, "notifications disabled, suppressing push");
            Attempt::Suppressed
        };

        entrant
            .mark_notified()
            .map_err(|e| self.fail(entrant_id, 0, e.to_string()))?;
        self.store
            .upsert(entrant)
            .map_err(|e| self.fail(entrant_id, 0, e.to_string()))?;

        let state = match attempt {
            Attempt::Sent => DeliveryState::Delivered {
                at: self.store.now(),
            },
            Attempt::Suppressed => DeliveryState::Suppressed,
        };
        self.ledger.lock().insert(entrant_id, state);
        Ok(attempt)
    }

    /// Sends `message`, retrying transient failures and timeouts.
    ///
    /// Returns the number of attempts, or the attempt count and last error
    /// once retries are exhausted or the failure is permanent.
    async fn send_with_retry(&self, message: &PushMessage) -> Result<u32, (u32, PushError)> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let sent =
                tokio::time::timeout(self.config.attempt_timeout, self.gateway.send(message)).await;
            let error = match sent {
                Ok(Ok(())) => return Ok(attempt),
                Ok(Err(err)) if !err.is_transient() => return Err((attempt, err)),
                Ok(Err(err)) => err,
                Err(_) => PushError::Transient(format!(
                    "send timed out after {:?}",
                    self.config.attempt_timeout
                )),
            };
            if attempt >= retry.max_attempts {
                return Err((attempt, error));
            }
            debug!(target = %message.target, attempt, %error, "retrying push");
            tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
        }
    }

    fn fail(&self, entrant_id: EntrantId, attempts: u32, error: String) -> DeliveryFailure {
        self.ledger.lock().insert(
            entrant_id,
            DeliveryState::Failed {
                attempts,
                error: error.clone(),
            },
        );
        DeliveryFailure {
            entrant_id,
            attempts,
            error,
        }
    }

    /// Sends an organizer's message to every entrant of `group`.
    ///
    /// Entrants who opted out are listed as suppressed; each delivery is
    /// logged in the store like a single notice.
    pub async fn notify_group(
        &self,
        event_id: EventId,
        group: Group,
        message: &str,
    ) -> LotteryResult<NotifyResult> {
        let message = message.trim();
        if message.is_empty() {
            return Err(LotteryError::EmptyMessage);
        }
        if self.store.event(event_id)?.is_none() {
            return Err(LotteryError::EventNotFound(event_id));
        }

        let mut result = NotifyResult::default();
        let recipients = self.store.entrants_of(event_id)?;
        for entrant in recipients.iter().filter(|e| group.contains(e)) {
            if !entrant.notifications_enabled {
                result.suppressed.push(entrant.id);
                continue;
            }
            let notice = Notice {
                recipient: entrant.user_id.clone(),
                target: PushTarget::for_entrant(entrant),
                entrant_id: Some(entrant.id),
                event_id,
                kind: NotificationKind::OrganizerMessage,
                title: group.title().to_string(),
                message: message.to_string(),
            };
            match self.send_notice(notice).await {
                Ok(_) => result.delivered.push(entrant.id),
                Err((attempts, error)) => result.failed.push(DeliveryFailure {
                    entrant_id: entrant.id,
                    attempts,
                    error: error.to_string(),
                }),
            }
        }

        info!(
            event = %event_id,
            ?group,
            delivered = result.delivered.len(),
            suppressed = result.suppressed.len(),
            failed = result.failed.len(),
            "group message sent"
        );
        Ok(result)
    }

    /// Sends a notice to one user and logs it in the store.
    ///
    /// The record is written even when the push fails, so the notice still
    /// shows up in the recipient's inbox.
    pub async fn notify_user(&self, notice: Notice) -> Result<NotificationRecord, PushError> {
        self.send_notice(notice).await.map_err(|(_, error)| error)
    }

    async fn send_notice(&self, notice: Notice) -> Result<NotificationRecord, (u32, PushError)> {
        let record = NotificationRecord::new(
            notice.recipient.clone(),
            notice.entrant_id,
            notice.event_id,
            notice.kind,
            notice.title.clone(),
            notice.message.clone(),
            self.store.now(),
        );
        if let Err(e) = self.store.upsert(record.clone()) {
            warn!(recipient = %notice.recipient, error = %e, "could not store notice");
        }

        let message = PushMessage::new(notice.target, notice.title, notice.message)
            .with_data("eventId", notice.event_id.to_string());
        match self.send_with_retry(&message).await {
            Ok(_) => Ok(record),
            Err((attempts, error)) => {
                warn!(recipient = %notice.recipient, attempts, %error, "notice delivery failed");
                Err((attempts, error))
            }
        }
    }
}
