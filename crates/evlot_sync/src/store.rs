//! The session-scoped sync store.

use crate::auth::Session;
use crate::change_feed::{
    Change, ChangeFeed, ChangeKind, ChangeSource, Predicate, Subscription, SubscriptionId,
};
use crate::config::SyncConfig;
use crate::error::{AuthError, ConflictError, SyncError, SyncResult};
use crate::merge::{merge_fields, FieldStamp, StampMap};
use crate::oplog::Oplog;
use crate::remote::{Mutation, MutationOp, PushAck, RemoteRecord, RemoteStore};
use evlot_model::{
    changed_fields, Clock, Collection, DocKey, Document, DrawRecord, Entrant, EntrantId, Event,
    EventId, FieldMap, ModelError, NotificationRecord, Timestamp, UserId,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The current state of the store's sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No sync has run yet.
    Idle,
    /// Pulling remote changes.
    Pulling,
    /// Pushing pending mutations.
    Pushing,
    /// The last pass completed.
    Synced,
    /// The last pass failed.
    Error,
    /// Waiting before a retry.
    RetryWait,
    /// The store was closed.
    Closed,
}

impl SyncState {
    /// Returns true while a pass is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Pulling | SyncState::Pushing)
    }

    /// Returns true if a new pass may start.
    pub fn can_start_sync(&self) -> bool {
        matches!(
            self,
            SyncState::Idle | SyncState::Synced | SyncState::Error | SyncState::RetryWait
        )
    }
}

/// Cumulative statistics.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Completed sync passes.
    pub cycles_completed: u64,
    /// Remote changes applied.
    pub documents_pulled: u64,
    /// Mutations accepted by the remote.
    pub mutations_pushed: u64,
    /// Conflicts detected.
    pub conflicts: u64,
    /// Retries performed by `sync_with_retry`.
    pub retries: u64,
    /// Local time of the last completed pass.
    pub last_sync_at: Option<Timestamp>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Remote changes applied.
    pub pulled: u64,
    /// Mutations accepted by the remote.
    pub pushed: u64,
    /// Local writes dropped because the remote rejected or deleted the
    /// document.
    pub conflicts: u64,
    /// Wall time of the pass.
    pub duration: Duration,
}

#[derive(Debug, Clone)]
enum CacheEntry {
    Live {
        doc: Document,
        fields: FieldMap,
        stamps: StampMap,
        remote_seq: u64,
    },
    Tombstone {
        remote: bool,
        remote_seq: u64,
    },
}

impl CacheEntry {
    fn remote_seq(&self) -> u64 {
        match self {
            CacheEntry::Live { remote_seq, .. } | CacheEntry::Tombstone { remote_seq, .. } => {
                *remote_seq
            }
        }
    }

    fn live(&self) -> Option<&Document> {
        match self {
            CacheEntry::Live { doc, .. } => Some(doc),
            CacheEntry::Tombstone { .. } => None,
        }
    }
}

/// Local cache of event documents kept in sync with a remote store.
///
/// A store belongs to one authenticated session. Writes are applied to the
/// cache immediately and queued for the remote; [`sync`](Self::sync)
/// pulls remote versions, merges them field by field and pushes the queue.
/// [`close`](Self::close) tears the session down.
pub struct SyncStore {
    config: SyncConfig,
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    session: RwLock<Option<Session>>,
    cache: RwLock<BTreeMap<DocKey, CacheEntry>>,
    oplog: Mutex<Oplog>,
    feed: ChangeFeed,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
    session_verified: AtomicBool,
    sync_guard: Mutex<()>,
}

impl SyncStore {
    /// Opens a store for `session`.
    pub fn new(
        config: SyncConfig,
        remote: Arc<dyn RemoteStore>,
        session: Session,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!(user = %session.user_id, "sync store opened");
        let feed = ChangeFeed::new(config.history_limit);
        Self {
            config,
            remote,
            clock,
            session: RwLock::new(Some(session)),
            cache: RwLock::new(BTreeMap::new()),
            oplog: Mutex::new(Oplog::new()),
            feed,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
            session_verified: AtomicBool::new(false),
            sync_guard: Mutex::new(()),
        }
    }

    /// Returns the store's clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Returns the current time on the store's clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Returns the session, or [`SyncError::Closed`] after logout.
    pub fn session(&self) -> SyncResult<Session> {
        self.session.read().clone().ok_or(SyncError::Closed)
    }

    /// Returns the signed-in user.
    pub fn user_id(&self) -> SyncResult<UserId> {
        Ok(self.session()?.user_id)
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Number of writes not yet pushed.
    pub fn pending_count(&self) -> usize {
        self.oplog.lock().pending_count()
    }

    /// Returns true once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.session.read().is_none()
    }

    fn ensure_open(&self) -> SyncResult<()> {
        if self.is_closed() {
            Err(SyncError::Closed)
        } else {
            Ok(())
        }
    }

    fn write_session(&self) -> SyncResult<Session> {
        let session = self.session()?;
        if session.is_expired(self.clock.now()) {
            return Err(AuthError::Expired.into());
        }
        if !self.session_verified.load(Ordering::Acquire) {
            match self.remote.verify_session(&session) {
                Ok(()) => self.session_verified.store(true, Ordering::Release),
                Err(SyncError::Auth(e)) => {
                    warn!(user = %session.user_id, error = %e, "session rejected");
                    return Err(SyncError::Auth(e));
                }
                // Offline: the remote checks the token again at push.
                Err(e) => debug!(error = %e, "session check deferred"),
            }
        }
        Ok(session)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Writes a document to the cache and queues it for the remote.
    ///
    /// Fails with [`SyncError::Conflict`] if the document was deleted; call
    /// [`refresh`](Self::refresh) before writing again.
    pub fn upsert(&self, doc: impl Into<Document>) -> SyncResult<()> {
        let doc = doc.into();
        let session = self.write_session()?;
        doc.validate()?;
        let key = doc.key();
        let fields = doc.to_fields()?;
        let now = self.clock.now();

        {
            let mut cache = self.cache.write();
            let (previous, prev_fields, mut stamps, remote_seq) = match cache.get(&key) {
                Some(CacheEntry::Tombstone { .. }) => {
                    return Err(ConflictError::new(key, "document was deleted").into());
                }
                Some(CacheEntry::Live {
                    doc: prev,
                    fields,
                    stamps,
                    remote_seq,
                }) => {
                    doc.validate_update(prev)?;
                    (Some(prev.clone()), fields.clone(), stamps.clone(), *remote_seq)
                }
                None => (None, FieldMap::new(), StampMap::new(), 0),
            };

            let changed = changed_fields(&prev_fields, &fields);
            if changed.is_empty() {
                return Ok(());
            }
            for name in &changed {
                if fields.contains_key(name) {
                    let at = match stamps.get(name) {
                        Some(prev) if prev.at >= now => {
                            Timestamp::from_millis(prev.at.as_millis() + 1)
                        }
                        _ => now,
                    };
                    stamps.insert(name.clone(), FieldStamp::local(at));
                } else {
                    stamps.remove(name);
                }
            }

            self.oplog.lock().append(
                key,
                MutationOp::Put {
                    fields: fields.clone(),
                    changed: changed.clone(),
                },
                now,
                session.user_id.clone(),
            );
            cache.insert(
                key,
                CacheEntry::Live {
                    doc: doc.clone(),
                    fields,
                    stamps,
                    remote_seq,
                },
            );
            debug!(%key, fields = changed.len(), "local upsert");
            self.feed.enqueue(Change {
                sequence: 0,
                key,
                kind: if previous.is_some() {
                    ChangeKind::Updated
                } else {
                    ChangeKind::Created
                },
                source: ChangeSource::Local,
                document: Some(doc),
                previous,
                changed_fields: changed,
            });
        }
        self.feed.dispatch();
        Ok(())
    }

    /// Deletes a document locally and queues the delete.
    pub fn delete(&self, key: DocKey) -> SyncResult<()> {
        let session = self.write_session()?;
        if key.collection == Collection::Draws {
            return Err(ModelError::ImmutableDocument { collection: "draws" }.into());
        }
        {
            let mut cache = self.cache.write();
            let (previous, remote_seq) = match cache.get(&key) {
                Some(CacheEntry::Live {
                    doc, remote_seq, ..
                }) => (doc.clone(), *remote_seq),
                _ => return Err(SyncError::NotFound { key }),
            };
            self.oplog.lock().append(
                key,
                MutationOp::Delete,
                self.clock.now(),
                session.user_id,
            );
            cache.insert(
                key,
                CacheEntry::Tombstone {
                    remote: false,
                    remote_seq,
                },
            );
            debug!(%key, "local delete");
            self.feed.enqueue(Change {
                sequence: 0,
                key,
                kind: ChangeKind::Deleted,
                source: ChangeSource::Local,
                document: None,
                previous: Some(previous),
                changed_fields: Vec::new(),
            });
        }
        self.feed.dispatch();
        Ok(())
    }

    /// Creates a document on the remote only if its key is unused there.
    ///
    /// This is a direct remote write: it fails with
    /// [`SyncError::AlreadyExists`] when any version (even a deleted one)
    /// exists, in which case the cache is refreshed with the remote copy.
    pub fn create_exclusive(&self, doc: impl Into<Document>) -> SyncResult<()> {
        let doc = doc.into();
        let session = self.write_session()?;
        doc.validate()?;
        let key = doc.key();
        let fields = doc.to_fields()?;
        let mutation = Mutation {
            key,
            op: MutationOp::Put {
                changed: fields.keys().cloned().collect(),
                fields: fields.clone(),
            },
            author: session.user_id,
            token: session.token,
            local_at: self.clock.now(),
        };

        match self.remote.create_if_absent(&mutation) {
            Ok(ack) => {
                let stamps = fields
                    .keys()
                    .map(|name| (name.clone(), FieldStamp::server(ack.server_time)))
                    .collect();
                {
                    let mut cache = self.cache.write();
                    let previous = cache.get(&key).and_then(|e| e.live().cloned());
                    cache.insert(
                        key,
                        CacheEntry::Live {
                            doc: doc.clone(),
                            fields,
                            stamps,
                            remote_seq: ack.seq,
                        },
                    );
                    self.feed.enqueue(Change {
                        sequence: 0,
                        key,
                        kind: ChangeKind::Created,
                        source: ChangeSource::Local,
                        document: Some(doc),
                        previous,
                        changed_fields: Vec::new(),
                    });
                }
                self.feed.dispatch();
                debug!(%key, seq = ack.seq, "exclusive create");
                Ok(())
            }
            Err(SyncError::AlreadyExists { key }) => {
                if let Err(e) = self.refresh(key) {
                    warn!(%key, error = %e, "could not refresh existing document");
                }
                Err(SyncError::AlreadyExists { key })
            }
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Returns the cached document at `key`.
    pub fn get(&self, key: DocKey) -> SyncResult<Option<Document>> {
        self.ensure_open()?;
        Ok(self.cache.read().get(&key).and_then(|e| e.live().cloned()))
    }

    /// Returns the cached event.
    pub fn event(&self, id: EventId) -> SyncResult<Option<Event>> {
        Ok(match self.get(DocKey::event(id))? {
            Some(Document::Event(event)) => Some(event),
            _ => None,
        })
    }

    /// Returns the cached entrant.
    pub fn entrant(&self, id: EntrantId) -> SyncResult<Option<Entrant>> {
        Ok(match self.get(DocKey::entrant(id))? {
            Some(Document::Entrant(entrant)) => Some(entrant),
            _ => None,
        })
    }

    /// Returns the cached draw record of an event.
    pub fn draw(&self, event_id: EventId) -> SyncResult<Option<DrawRecord>> {
        Ok(match self.get(DocKey::draw(event_id))? {
            Some(Document::Draw(record)) => Some(record),
            _ => None,
        })
    }

    /// Returns cached documents matching `predicate`, ordered by key.
    pub fn query<F>(&self, predicate: F) -> SyncResult<Vec<Document>>
    where
        F: Fn(&Document) -> bool,
    {
        self.ensure_open()?;
        Ok(self
            .cache
            .read()
            .values()
            .filter_map(CacheEntry::live)
            .filter(|doc| predicate(doc))
            .cloned()
            .collect())
    }

    /// Returns the cached entrants of an event, ordered by entrant id.
    pub fn entrants_of(&self, event_id: EventId) -> SyncResult<Vec<Entrant>> {
        Ok(self
            .query(|doc| doc.as_entrant().is_some_and(|e| e.event_id == event_id))?
            .into_iter()
            .filter_map(|doc| match doc {
                Document::Entrant(entrant) => Some(entrant),
                _ => None,
            })
            .collect())
    }

    /// Returns the cached notification records of an event.
    pub fn notifications_of(&self, event_id: EventId) -> SyncResult<Vec<NotificationRecord>> {
        Ok(self
            .query(|doc| doc.as_notification().is_some_and(|n| n.event_id == event_id))?
            .into_iter()
            .filter_map(|doc| match doc {
                Document::Notification(record) => Some(record),
                _ => None,
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Subscribes to changes of documents matching `predicate`.
    pub fn subscribe<F>(&self, predicate: F) -> SyncResult<Subscription>
    where
        F: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        self.ensure_open()?;
        Ok(self.feed.subscribe(Arc::new(predicate)))
    }

    /// Registers a callback for changes of documents matching `predicate`.
    ///
    /// Callbacks run on the thread that made the change, after the cache
    /// lock is released, in emission order.
    pub fn subscribe_with<F, C>(&self, predicate: F, on_change: C) -> SyncResult<SubscriptionId>
    where
        F: Fn(&Document) -> bool + Send + Sync + 'static,
        C: Fn(&Change) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let predicate: Predicate = Arc::new(predicate);
        Ok(self.feed.subscribe_with(predicate, Arc::new(on_change)))
    }

    /// Removes a callback registration.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.feed.unsubscribe(id)
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    /// Cancels a running sync pass.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        let mut current = self.state.write();
        if *current != SyncState::Closed {
            *current = state;
        }
    }

    fn handle_error(&self, error: &SyncError) {
        self.set_state(SyncState::Error);
        self.stats.write().last_error = Some(error.to_string());
    }

    /// Runs one pass: pull and merge remote changes, then push pending
    /// mutations.
    pub fn sync(&self) -> SyncResult<SyncReport> {
        let session = self.session()?;
        let Some(_guard) = self.sync_guard.try_lock() else {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", self.state()),
                to: "sync".into(),
            });
        };
        self.cancelled.store(false, Ordering::SeqCst);
        let start = Instant::now();

        match self.run_pass(&session) {
            Ok(mut report) => {
                report.duration = start.elapsed();
                self.set_state(SyncState::Synced);
                let mut stats = self.stats.write();
                stats.cycles_completed += 1;
                stats.documents_pulled += report.pulled;
                stats.mutations_pushed += report.pushed;
                stats.conflicts += report.conflicts;
                stats.last_sync_at = Some(self.clock.now());
                stats.last_error = None;
                info!(
                    pulled = report.pulled,
                    pushed = report.pushed,
                    conflicts = report.conflicts,
                    "sync pass complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.handle_error(&e);
                warn!(error = %e, "sync pass failed");
                Err(e)
            }
        }
    }

    /// Runs [`sync`](Self::sync), retrying transient failures with backoff.
    pub fn sync_with_retry(&self) -> SyncResult<SyncReport> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                self.set_state(SyncState::RetryWait);
                std::thread::sleep(retry.delay_for_attempt(attempt));
                self.stats.write().retries += 1;
            }
            match self.sync() {
                Ok(report) => return Ok(report),
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    warn!(attempt, error = %e, "retrying sync");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn run_pass(&self, session: &Session) -> SyncResult<SyncReport> {
        let mut report = SyncReport::default();

        self.set_state(SyncState::Pulling);
        let (pulled, conflicts) = self.pull_all()?;
        report.pulled = pulled;
        report.conflicts += conflicts;

        self.check_cancelled()?;

        self.set_state(SyncState::Pushing);
        let (pushed, conflicts) = self.push_all(session)?;
        report.pushed = pushed;
        report.conflicts += conflicts;

        Ok(report)
    }

    fn pull_all(&self) -> SyncResult<(u64, u64)> {
        let mut pulled = 0;
        let mut conflicts = 0;
        loop {
            self.check_cancelled()?;
            let cursor = self.oplog.lock().server_cursor();
            let batch = self.remote.pull(cursor, self.config.pull_batch_size)?;

            {
                let mut cache = self.cache.write();
                for record in &batch.changes {
                    let (applied, conflict) = self.apply_remote(&mut cache, record);
                    pulled += u64::from(applied);
                    conflicts += u64::from(conflict);
                }
                self.oplog.lock().set_server_cursor(batch.cursor);
            }
            self.feed.dispatch();

            if !batch.has_more {
                return Ok((pulled, conflicts));
            }
        }
    }

    /// Merges one remote version into the cache. Returns (applied, conflict).
    fn apply_remote(
        &self,
        cache: &mut BTreeMap<DocKey, CacheEntry>,
        record: &RemoteRecord,
    ) -> (bool, bool) {
        let key = record.key;
        let existing = cache.get(&key).cloned();
        if existing
            .as_ref()
            .is_some_and(|e| e.remote_seq() >= record.seq)
        {
            return (false, false);
        }

        let Some(remote_fields) = &record.fields else {
            let dropped = self.oplog.lock().discard_for(&key);
            cache.insert(
                key,
                CacheEntry::Tombstone {
                    remote: true,
                    remote_seq: record.seq,
                },
            );
            let previous = existing.as_ref().and_then(|e| e.live().cloned());
            let had_local_writes = previous.is_some() && dropped > 0;
            if had_local_writes {
                warn!(%key, dropped, "remote delete discarded local writes");
            }
            if let Some(previous) = previous {
                self.feed.enqueue(Change {
                    sequence: 0,
                    key,
                    kind: ChangeKind::Deleted,
                    source: ChangeSource::Remote,
                    document: None,
                    previous: Some(previous),
                    changed_fields: Vec::new(),
                });
            }
            return (true, had_local_writes);
        };

        match existing {
            Some(CacheEntry::Live {
                doc: prev,
                fields,
                stamps,
                ..
            }) => {
                let merged = merge_fields(&fields, &stamps, remote_fields, &record.field_times);
                if merged.is_conflict() {
                    debug!(%key, fields = ?merged.local_kept, "pending local fields kept");
                }
                let mut conflict = false;
                let (doc, next_fields, next_stamps) =
                    match Document::from_fields(key, &merged.fields) {
                        Ok(doc) => (doc, merged.fields, merged.stamps),
                        Err(e) => match Document::from_fields(key, remote_fields) {
                            Ok(doc) => {
                                warn!(%key, error = %e, "merged document invalid, taking remote");
                                conflict = true;
                                (doc, remote_fields.clone(), server_stamps(record))
                            }
                            Err(e) => {
                                warn!(%key, error = %e, "skipping invalid remote document");
                                return (false, true);
                            }
                        },
                    };

                let changed = changed_fields(&fields, &next_fields);
                cache.insert(
                    key,
                    CacheEntry::Live {
                        doc: doc.clone(),
                        fields: next_fields,
                        stamps: next_stamps,
                        remote_seq: record.seq,
                    },
                );
                if !changed.is_empty() {
                    self.feed.enqueue(Change {
                        sequence: 0,
                        key,
                        kind: ChangeKind::Updated,
                        source: ChangeSource::Remote,
                        document: Some(doc),
                        previous: Some(prev),
                        changed_fields: changed,
                    });
                }
                (true, conflict)
            }
            Some(CacheEntry::Tombstone { remote: false, .. }) => {
                // A pending local delete outranks the remote version.
                (false, false)
            }
            Some(CacheEntry::Tombstone { remote: true, .. }) | None => {
                match Document::from_fields(key, remote_fields) {
                    Ok(doc) => {
                        cache.insert(
                            key,
                            CacheEntry::Live {
                                doc: doc.clone(),
                                fields: remote_fields.clone(),
                                stamps: server_stamps(record),
                                remote_seq: record.seq,
                            },
                        );
                        self.feed.enqueue(Change {
                            sequence: 0,
                            key,
                            kind: ChangeKind::Created,
                            source: ChangeSource::Remote,
                            document: Some(doc),
                            previous: None,
                            changed_fields: remote_fields.keys().cloned().collect(),
                        });
                        (true, false)
                    }
                    Err(e) => {
                        warn!(%key, error = %e, "skipping invalid remote document");
                        (false, true)
                    }
                }
            }
        }
    }

    fn push_all(&self, session: &Session) -> SyncResult<(u64, u64)> {
        let mut pushed = 0;
        let mut conflicts = 0;
        loop {
            self.check_cancelled()?;
            let batch = self
                .oplog
                .lock()
                .pending_batch(self.config.push_batch_size as usize);
            if batch.is_empty() {
                return Ok((pushed, conflicts));
            }

            for pending in batch {
                let mutation = Mutation {
                    key: pending.key,
                    op: pending.op,
                    author: pending.author,
                    token: session.token.clone(),
                    local_at: pending.local_at,
                };
                match self.remote.push(&mutation) {
                    Ok(ack) => {
                        self.oplog.lock().acknowledge(pending.op_id);
                        self.confirm_push(&mutation, &ack);
                        pushed += 1;
                    }
                    Err(SyncError::Conflict(conflict)) => {
                        warn!(key = %conflict.key, reason = %conflict.reason, "push rejected");
                        self.oplog.lock().acknowledge(pending.op_id);
                        conflicts += 1;
                        conflicts += self.reload(mutation.key)?.0;
                        // The reload dropped later writes to this key.
                        break;
                    }
                    Err(SyncError::NotFound { key }) if mutation.op == MutationOp::Delete => {
                        debug!(%key, "delete of unknown document dropped");
                        self.oplog.lock().acknowledge(pending.op_id);
                    }
                    Err(SyncError::Auth(e)) => {
                        self.session_verified.store(false, Ordering::Release);
                        let dropped = self.discard_pending()?;
                        warn!(error = %e, dropped, "session rejected at push, writes dropped");
                        return Err(SyncError::Auth(e));
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    /// Drops every pending mutation and restores the remote version of the
    /// documents they touched.
    fn discard_pending(&self) -> SyncResult<u64> {
        let keys: BTreeSet<DocKey> = self
            .oplog
            .lock()
            .pending_batch(usize::MAX)
            .into_iter()
            .map(|m| m.key)
            .collect();
        let mut dropped = 0;
        for key in keys {
            dropped += self.reload(key)?.0;
        }
        Ok(dropped)
    }

    /// Replaces local stamps of pushed fields with the server time.
    fn confirm_push(&self, mutation: &Mutation, ack: &PushAck) {
        let MutationOp::Put { fields: pushed, .. } = &mutation.op else {
            return;
        };
        let key = mutation.key;
        {
            let mut cache = self.cache.write();
            let still_pending = self.oplog.lock().pending_fields(&key);
            let Some(CacheEntry::Live {
                doc,
                fields,
                stamps,
                remote_seq,
            }) = cache.get(&key).cloned()
            else {
                return;
            };

            let server = FieldStamp::server(ack.server_time);
            let mut next_fields = fields.clone();
            let mut next_stamps = stamps;
            for name in ack.fields.iter().filter(|n| !still_pending.contains(*n)) {
                if next_stamps.get(name).is_some_and(|s| *s >= server) {
                    continue;
                }
                match pushed.get(name) {
                    Some(value) => next_fields.insert(name.clone(), value.clone()),
                    None => next_fields.remove(name),
                };
                next_stamps.insert(name.clone(), server);
            }

            let changed = changed_fields(&fields, &next_fields);
            let next_doc = if changed.is_empty() {
                Some(doc.clone())
            } else {
                Document::from_fields(key, &next_fields).ok()
            };
            let Some(next_doc) = next_doc else {
                return;
            };
            cache.insert(
                key,
                CacheEntry::Live {
                    doc: next_doc.clone(),
                    fields: next_fields,
                    stamps: next_stamps,
                    remote_seq,
                },
            );
            if !changed.is_empty() {
                self.feed.enqueue(Change {
                    sequence: 0,
                    key,
                    kind: ChangeKind::Updated,
                    source: ChangeSource::Remote,
                    document: Some(next_doc),
                    previous: Some(doc),
                    changed_fields: changed,
                });
            }
        }
        self.feed.dispatch();
    }

    /// Re-fetches one document from the remote, discarding local writes to
    /// it and clearing a tombstone if the document still exists.
    pub fn refresh(&self, key: DocKey) -> SyncResult<Option<Document>> {
        self.ensure_open()?;
        Ok(self.reload(key)?.1)
    }

    fn reload(&self, key: DocKey) -> SyncResult<(u64, Option<Document>)> {
        let record = self.remote.fetch(key)?;
        let result = {
            let mut cache = self.cache.write();
            let dropped = self.oplog.lock().discard_for(&key) as u64;
            let previous = cache.get(&key).and_then(|e| e.live().cloned());

            let current = match record {
                None => {
                    cache.remove(&key);
                    None
                }
                Some(record) => match &record.fields {
                    None => {
                        cache.insert(
                            key,
                            CacheEntry::Tombstone {
                                remote: true,
                                remote_seq: record.seq,
                            },
                        );
                        None
                    }
                    Some(fields) => {
                        let doc = Document::from_fields(key, fields)?;
                        cache.insert(
                            key,
                            CacheEntry::Live {
                                doc: doc.clone(),
                                fields: fields.clone(),
                                stamps: server_stamps(&record),
                                remote_seq: record.seq,
                            },
                        );
                        Some(doc)
                    }
                },
            };

            if previous != current {
                let kind = match (&previous, &current) {
                    (None, _) => ChangeKind::Created,
                    (Some(_), None) => ChangeKind::Deleted,
                    (Some(_), Some(_)) => ChangeKind::Updated,
                };
                let changed = match (&previous, &current) {
                    (Some(before), Some(after)) => {
                        changed_fields(&before.to_fields()?, &after.to_fields()?)
                    }
                    _ => Vec::new(),
                };
                self.feed.enqueue(Change {
                    sequence: 0,
                    key,
                    kind,
                    source: ChangeSource::Remote,
                    document: current.clone(),
                    previous,
                    changed_fields: changed,
                });
            }
            debug!(%key, dropped, "refreshed from remote");
            (dropped, current)
        };
        self.feed.dispatch();
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Ends the session: clears the cache and pending writes and cancels
    /// every subscription. Later calls fail with [`SyncError::Closed`].
    pub fn close(&self) {
        let Some(session) = self.session.write().take() else {
            return;
        };
        let pending = {
            let mut oplog = self.oplog.lock();
            let pending = oplog.pending_count();
            oplog.clear();
            pending
        };
        self.cache.write().clear();
        self.feed.close();
        *self.state.write() = SyncState::Closed;
        if pending > 0 {
            warn!(user = %session.user_id, pending, "closing with unpushed writes");
        }
        info!(user = %session.user_id, "sync store closed");
    }
}

fn server_stamps(record: &RemoteRecord) -> StampMap {
    record
        .field_times
        .iter()
        .map(|(name, at)| (name.clone(), FieldStamp::server(*at)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthConfig, AuthToken, TokenIssuer, TokenValidator};
    use crate::config::RetryConfig;
    use crate::remote::MemoryRemote;
    use evlot_model::{Coordinate, EntrantStatus, Geofence, ManualClock};
    use std::sync::atomic::AtomicUsize;

    struct Harness {
        clock: Arc<ManualClock>,
        remote: Arc<MemoryRemote>,
        issuer: TokenIssuer,
    }

    impl Harness {
        fn new() -> Self {
            let config = AuthConfig::new(b"store-test-secret".to_vec())
                .with_expiry(Duration::from_secs(3_600));
            let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000)));
            let remote = Arc::new(MemoryRemote::new(
                TokenValidator::new(config.clone()),
                clock.clone(),
            ));
            Self {
                clock,
                remote,
                issuer: TokenIssuer::new(config),
            }
        }

        fn store(&self, user: &str) -> SyncStore {
            let session = self
                .issuer
                .issue(&UserId::new(user), self.clock.now())
                .unwrap();
            let config = SyncConfig::new()
                .with_pull_batch_size(2)
                .with_retry(
                    RetryConfig::new(3)
                        .with_initial_delay(Duration::from_millis(1))
                        .with_jitter(false),
                );
            SyncStore::new(config, self.remote.clone(), session, self.clock.clone())
        }

        fn tick(&self) {
            self.clock.advance(Duration::from_millis(10));
        }
    }

    fn event() -> Event {
        Event::new(
            "Ceramics",
            2,
            Geofence::new(Coordinate::new(51.0, 0.0), 300.0),
            Timestamp::from_millis(0),
            Timestamp::from_millis(1_000_000),
            UserId::new("org"),
        )
    }

    #[test]
    fn upsert_is_visible_and_queued() {
        let h = Harness::new();
        let store = h.store("org");
        let sub = store.subscribe(|_| true).unwrap();

        let e = event();
        store.upsert(e.clone()).unwrap();

        assert_eq!(store.event(e.id).unwrap(), Some(e.clone()));
        assert_eq!(store.pending_count(), 1);
        let change = sub.try_next().unwrap();
        assert_eq!(change.kind, ChangeKind::Created);
        assert_eq!(change.source, ChangeSource::Local);

        // Writing the same content again is a no-op.
        store.upsert(e).unwrap();
        assert_eq!(store.pending_count(), 1);
        assert!(sub.try_next().is_none());
    }

    #[test]
    fn sync_moves_documents_between_sessions() {
        let h = Harness::new();
        let organizer = h.store("org");
        let entrant = h.store("ada");

        let e = event();
        organizer.upsert(e.clone()).unwrap();
        let report = organizer.sync().unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(organizer.pending_count(), 0);
        assert_eq!(organizer.state(), SyncState::Synced);

        let report = entrant.sync().unwrap();
        assert_eq!(report.pulled, 1);
        assert_eq!(entrant.event(e.id).unwrap(), Some(e));
    }

    #[test]
    fn disjoint_fields_merge() {
        let h = Harness::new();
        let a = h.store("org");
        let b = h.store("org");

        let e = event();
        a.upsert(e.clone()).unwrap();
        a.sync().unwrap();
        b.sync().unwrap();

        h.tick();
        let mut bigger = e.clone();
        bigger.capacity = 9;
        a.upsert(bigger).unwrap();

        h.tick();
        let mut renamed = e.clone();
        renamed.title = "Glazing".into();
        b.upsert(renamed).unwrap();

        a.sync().unwrap();
        b.sync().unwrap();
        a.sync().unwrap();

        for store in [&a, &b] {
            let merged = store.event(e.id).unwrap().unwrap();
            assert_eq!(merged.capacity, 9);
            assert_eq!(merged.title, "Glazing");
        }
    }

    #[test]
    fn same_field_converges_on_last_push() {
        let h = Harness::new();
        let a = h.store("org");
        let b = h.store("org");

        let e = event();
        a.upsert(e.clone()).unwrap();
        a.sync().unwrap();
        b.sync().unwrap();

        h.tick();
        let mut five = e.clone();
        five.capacity = 5;
        a.upsert(five).unwrap();
        h.tick();
        let mut seven = e.clone();
        seven.capacity = 7;
        b.upsert(seven).unwrap();

        a.sync().unwrap();
        let report = b.sync().unwrap();
        assert_eq!(report.pushed, 1);
        a.sync().unwrap();

        assert_eq!(a.event(e.id).unwrap().unwrap().capacity, 7);
        assert_eq!(b.event(e.id).unwrap().unwrap().capacity, 7);
    }

    #[test]
    fn upsert_after_remote_delete_conflicts() {
        let h = Harness::new();
        let a = h.store("org");
        let b = h.store("org");

        let e = event();
        a.upsert(e.clone()).unwrap();
        a.sync().unwrap();
        b.sync().unwrap();

        b.delete(DocKey::event(e.id)).unwrap();
        b.sync().unwrap();
        a.sync().unwrap();

        let err = a.upsert(e.clone()).unwrap_err();
        assert!(matches!(err, SyncError::Conflict(_)));
        assert_eq!(a.refresh(DocKey::event(e.id)).unwrap(), None);
    }

    #[test]
    fn pending_write_to_deleted_document_is_dropped() {
        let h = Harness::new();
        let a = h.store("org");
        let b = h.store("org");

        let e = event();
        a.upsert(e.clone()).unwrap();
        a.sync().unwrap();
        b.sync().unwrap();

        b.delete(DocKey::event(e.id)).unwrap();
        b.sync().unwrap();

        let mut edited = e.clone();
        edited.capacity = 4;
        a.upsert(edited).unwrap();
        let report = a.sync().unwrap();
        assert_eq!(report.conflicts, 1);
        assert_eq!(a.pending_count(), 0);
        assert_eq!(a.event(e.id).unwrap(), None);
    }

    #[test]
    fn exclusive_create_happens_once() {
        let h = Harness::new();
        let a = h.store("org");
        let b = h.store("org");

        let e = event();
        let record = DrawRecord::new(
            e.id,
            7,
            1,
            vec![EntrantId::from_bytes([1; 16])],
            vec![EntrantId::from_bytes([1; 16])],
            h.clock.now(),
            UserId::new("org"),
        );
        a.create_exclusive(record.clone()).unwrap();
        assert_eq!(a.draw(e.id).unwrap(), Some(record.clone()));

        let mut rival = record.clone();
        rival.seed = 8;
        assert!(matches!(
            b.create_exclusive(rival),
            Err(SyncError::AlreadyExists { .. })
        ));
        // The loser now sees the winning record.
        assert_eq!(b.draw(e.id).unwrap(), Some(record));
    }

    #[test]
    fn forward_only_status_enforced_locally() {
        let h = Harness::new();
        let store = h.store("org");
        let e = event();
        let mut entrant = Entrant::new(e.id, UserId::new("ada"), "Ada", h.clock.now());
        entrant.check_in(h.clock.now(), None).unwrap();
        store.upsert(entrant.clone()).unwrap();

        let mut back = entrant;
        back.status = EntrantStatus::Registered;
        back.checked_in_at = None;
        assert!(matches!(store.upsert(back), Err(SyncError::Model(_))));
    }

    #[test]
    fn callbacks_see_remote_changes() {
        let h = Harness::new();
        let a = h.store("org");
        let b = h.store("org");
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        b.subscribe_with(
            |doc| doc.as_event().is_some(),
            move |change: &Change| {
                assert_eq!(change.source, ChangeSource::Remote);
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        a.upsert(event()).unwrap();
        a.upsert(event()).unwrap();
        a.upsert(event()).unwrap();
        a.sync().unwrap();
        let report = b.sync().unwrap();

        assert_eq!(report.pulled, 3);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_recovers_from_transient_failures() {
        let h = Harness::new();
        let store = h.store("org");
        store.upsert(event()).unwrap();

        h.remote.fail_next(2, true);
        let report = store.sync_with_retry().unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(store.stats().retries, 2);
    }

    #[test]
    fn fatal_failure_is_not_retried() {
        let h = Harness::new();
        let store = h.store("org");
        h.remote.fail_next(1, false);
        assert!(store.sync_with_retry().is_err());
        assert_eq!(store.state(), SyncState::Error);
        assert_eq!(store.stats().retries, 0);
        assert!(store.stats().last_error.is_some());
    }

    #[test]
    fn expired_session_cannot_write() {
        let h = Harness::new();
        let store = h.store("org");
        h.clock.advance(Duration::from_secs(3_601));
        assert!(matches!(
            store.upsert(event()),
            Err(SyncError::Auth(AuthError::Expired))
        ));
    }

    #[test]
    fn forged_token_cannot_write() {
        let h = Harness::new();
        let mut session = h
            .issuer
            .issue(&UserId::new("org"), h.clock.now())
            .unwrap();
        session.token = AuthToken::from_bytes(vec![0xde, 0xad]);
        let store = SyncStore::new(
            SyncConfig::new(),
            h.remote.clone(),
            session,
            h.clock.clone(),
        );

        let e = event();
        assert!(matches!(
            store.upsert(e.clone()),
            Err(SyncError::Auth(AuthError::Malformed(_)))
        ));
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.event(e.id).unwrap(), None);
        store.sync().unwrap();
    }

    #[test]
    fn rejected_push_does_not_wedge_the_queue() {
        let h = Harness::new();
        let store = h.store("org");
        let e = event();
        store.upsert(e.clone()).unwrap();

        h.clock.advance(Duration::from_secs(3_601));
        assert!(matches!(store.sync(), Err(SyncError::Auth(AuthError::Expired))));
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.event(e.id).unwrap(), None);
        assert_eq!(h.remote.log_len(), 0);

        store.sync().unwrap();
        assert_eq!(store.state(), SyncState::Synced);
    }

    #[test]
    fn close_tears_down_session() {
        let h = Harness::new();
        let store = h.store("org");
        let sub = store.subscribe(|_| true).unwrap();
        let e = event();
        store.upsert(e.clone()).unwrap();

        store.close();
        assert!(store.is_closed());
        assert!(sub.is_cancelled());
        assert_eq!(store.state(), SyncState::Closed);
        assert!(matches!(store.get(DocKey::event(e.id)), Err(SyncError::Closed)));
        assert!(matches!(store.upsert(e), Err(SyncError::Closed)));
        assert!(matches!(store.sync(), Err(SyncError::Closed)));
        assert_eq!(h.remote.log_len(), 0);
    }

    #[test]
    fn draws_cannot_be_deleted() {
        let h = Harness::new();
        let store = h.store("org");
        assert!(matches!(
            store.delete(DocKey::draw(EventId::new())),
            Err(SyncError::Model(ModelError::ImmutableDocument { .. }))
        ));
    }
}
