//! Change feed for cache mutations.
//!
//! Every change to the local cache, whether from a local write or a pulled
//! remote version, is emitted once with a monotonically increasing
//! sequence number. Consumers either hold a [`Subscription`] and poll it,
//! or register a callback that runs on the emitting thread.
//!
//! The feed:
//! - Preserves emission order for every consumer
//! - Keeps a bounded history so subscribers can ask for redelivery
//! - Never spawns threads

use evlot_model::{DocKey, Document};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Type of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Document appeared in the cache.
    Created,
    /// Document was modified.
    Updated,
    /// Document was deleted.
    Deleted,
}

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// A write made through this store.
    Local,
    /// A version pulled or fetched from the remote store.
    Remote,
}

/// A single change to the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Feed sequence number.
    pub sequence: u64,
    /// Changed document.
    pub key: DocKey,
    /// Type of change.
    pub kind: ChangeKind,
    /// Origin of the change.
    pub source: ChangeSource,
    /// Document after the change; `None` for deletes.
    pub document: Option<Document>,
    /// Document before the change, if it was cached.
    pub previous: Option<Document>,
    /// Fields that differ between the two versions.
    pub changed_fields: Vec<String>,
}

impl Change {
    /// Returns the newest version known for this change.
    pub fn latest(&self) -> Option<&Document> {
        self.document.as_ref().or(self.previous.as_ref())
    }

    fn matches(&self, predicate: &Predicate) -> bool {
        self.latest().is_some_and(|doc| predicate(doc))
    }
}

/// Filter deciding which documents a consumer sees.
pub type Predicate = Arc<dyn Fn(&Document) -> bool + Send + Sync>;

/// Callback invoked for matching changes.
pub type ChangeCallback = Arc<dyn Fn(&Change) + Send + Sync>;

/// Identifier of a callback registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Slot {
    predicate: Predicate,
    queue: Mutex<VecDeque<Change>>,
    cancelled: AtomicBool,
}

struct CallbackEntry {
    id: SubscriptionId,
    predicate: Predicate,
    callback: ChangeCallback,
}

struct FeedState {
    next_sequence: u64,
    next_id: u64,
    history: VecDeque<Change>,
    history_limit: usize,
    slots: Vec<Arc<Slot>>,
    callbacks: Vec<CallbackEntry>,
    pending_callbacks: VecDeque<(ChangeCallback, Change)>,
    closed: bool,
}

struct FeedShared {
    state: Mutex<FeedState>,
    dispatching: Mutex<()>,
}

/// The change feed of one store.
pub struct ChangeFeed {
    shared: Arc<FeedShared>,
}

impl ChangeFeed {
    /// Creates a feed keeping up to `history_limit` changes for redelivery.
    pub fn new(history_limit: usize) -> Self {
        Self {
            shared: Arc::new(FeedShared {
                state: Mutex::new(FeedState {
                    next_sequence: 1,
                    next_id: 1,
                    history: VecDeque::new(),
                    history_limit,
                    slots: Vec::new(),
                    callbacks: Vec::new(),
                    pending_callbacks: VecDeque::new(),
                    closed: false,
                }),
                dispatching: Mutex::new(()),
            }),
        }
    }

    /// Assigns a sequence number and queues `change` for every matching
    /// consumer.
    ///
    /// Queued callbacks run when [`dispatch`](Self::dispatch) is called.
    /// Returns the assigned sequence, or `None` if the feed is closed.
    pub fn enqueue(&self, mut change: Change) -> Option<u64> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return None;
        }
        change.sequence = state.next_sequence;
        state.next_sequence += 1;

        state.slots.retain(|slot| !slot.cancelled.load(Ordering::SeqCst));
        for slot in &state.slots {
            if change.matches(&slot.predicate) {
                slot.queue.lock().push_back(change.clone());
            }
        }
        let matching: Vec<ChangeCallback> = state
            .callbacks
            .iter()
            .filter(|entry| change.matches(&entry.predicate))
            .map(|entry| Arc::clone(&entry.callback))
            .collect();
        for callback in matching {
            state.pending_callbacks.push_back((callback, change.clone()));
        }

        let sequence = change.sequence;
        state.history.push_back(change);
        while state.history.len() > state.history_limit {
            state.history.pop_front();
        }
        Some(sequence)
    }

    /// Runs queued callbacks in emission order.
    ///
    /// Only one thread dispatches at a time; a callback that writes to the
    /// store has its own changes delivered by the outer dispatch loop.
    pub fn dispatch(&self) {
        loop {
            let Some(guard) = self.shared.dispatching.try_lock() else {
                return;
            };
            loop {
                let next = self.shared.state.lock().pending_callbacks.pop_front();
                match next {
                    Some((callback, change)) => callback(&change),
                    None => break,
                }
            }
            drop(guard);
            if self.shared.state.lock().pending_callbacks.is_empty() {
                return;
            }
        }
    }

    /// Queues and dispatches a change.
    pub fn emit(&self, change: Change) -> Option<u64> {
        let sequence = self.enqueue(change);
        self.dispatch();
        sequence
    }

    /// Creates a polling subscription.
    pub fn subscribe(&self, predicate: Predicate) -> Subscription {
        let slot = Arc::new(Slot {
            predicate,
            queue: Mutex::new(VecDeque::new()),
            cancelled: AtomicBool::new(false),
        });
        let mut state = self.shared.state.lock();
        if state.closed {
            slot.cancelled.store(true, Ordering::SeqCst);
        } else {
            state.slots.push(Arc::clone(&slot));
        }
        Subscription {
            slot,
            feed: Arc::downgrade(&self.shared),
        }
    }

    /// Registers a callback.
    pub fn subscribe_with(&self, predicate: Predicate, callback: ChangeCallback) -> SubscriptionId {
        let mut state = self.shared.state.lock();
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        if !state.closed {
            state.callbacks.push(CallbackEntry {
                id,
                predicate,
                callback,
            });
        }
        id
    }

    /// Removes a callback registration. Returns false if it was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.shared.state.lock();
        let before = state.callbacks.len();
        state.callbacks.retain(|entry| entry.id != id);
        state.callbacks.len() != before
    }

    /// Returns the sequence of the most recent change.
    pub fn latest_sequence(&self) -> u64 {
        self.shared.state.lock().next_sequence - 1
    }

    /// Number of live polling subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let state = self.shared.state.lock();
        state
            .slots
            .iter()
            .filter(|slot| !slot.cancelled.load(Ordering::SeqCst))
            .count()
            + state.callbacks.len()
    }

    /// Cancels every consumer and refuses further changes.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        for slot in state.slots.drain(..) {
            slot.cancelled.store(true, Ordering::SeqCst);
            slot.queue.lock().clear();
        }
        state.callbacks.clear();
        state.pending_callbacks.clear();
        state.history.clear();
    }
}

/// A cancellable handle yielding changes by polling.
///
/// The sequence is potentially infinite: polling an empty subscription
/// returns nothing until the next matching change. Dropping the handle
/// cancels it.
pub struct Subscription {
    slot: Arc<Slot>,
    feed: Weak<FeedShared>,
}

impl Subscription {
    /// Returns the next queued change, if any.
    pub fn try_next(&self) -> Option<Change> {
        if self.is_cancelled() {
            return None;
        }
        self.slot.queue.lock().pop_front()
    }

    /// Returns up to `limit` queued changes.
    pub fn poll(&self, limit: usize) -> Vec<Change> {
        if self.is_cancelled() {
            return Vec::new();
        }
        let mut queue = self.slot.queue.lock();
        let take = limit.min(queue.len());
        queue.drain(..take).collect()
    }

    /// Drains the queued changes.
    pub fn iter(&self) -> impl Iterator<Item = Change> + '_ {
        std::iter::from_fn(move || self.try_next())
    }

    /// Number of changes waiting.
    pub fn pending(&self) -> usize {
        self.slot.queue.lock().len()
    }

    /// Requeues retained changes with sequence `>= from` that match this
    /// subscription. Returns how many were queued.
    pub fn redeliver_from(&self, from: u64) -> usize {
        if self.is_cancelled() {
            return 0;
        }
        let Some(feed) = self.feed.upgrade() else {
            return 0;
        };
        let state = feed.state.lock();
        let mut queue = self.slot.queue.lock();
        let mut count = 0;
        for change in state.history.iter().filter(|c| c.sequence >= from) {
            if change.matches(&self.slot.predicate) {
                queue.push_back(change.clone());
                count += 1;
            }
        }
        count
    }

    /// Stops delivery and discards queued changes.
    pub fn cancel(&self) {
        self.slot.cancelled.store(true, Ordering::SeqCst);
        self.slot.queue.lock().clear();
    }

    /// Returns true once cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.slot.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evlot_model::{Coordinate, Event, Geofence, Timestamp, UserId};
    use std::sync::atomic::AtomicUsize;

    fn event(title: &str) -> Document {
        Document::Event(Event::new(
            title,
            1,
            Geofence::new(Coordinate::new(0.0, 0.0), 10.0),
            Timestamp::from_millis(0),
            Timestamp::from_millis(10),
            UserId::new("org"),
        ))
    }

    fn created(doc: Document) -> Change {
        Change {
            sequence: 0,
            key: doc.key(),
            kind: ChangeKind::Created,
            source: ChangeSource::Local,
            document: Some(doc),
            previous: None,
            changed_fields: Vec::new(),
        }
    }

    fn all() -> Predicate {
        Arc::new(|_: &Document| true)
    }

    #[test]
    fn emit_and_poll_in_order() {
        let feed = ChangeFeed::new(16);
        let sub = feed.subscribe(all());

        feed.emit(created(event("a")));
        feed.emit(created(event("b")));
        feed.emit(created(event("c")));

        let first = sub.poll(2);
        assert_eq!(first.iter().map(|c| c.sequence).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(sub.try_next().map(|c| c.sequence), Some(3));
        assert!(sub.try_next().is_none());
    }

    #[test]
    fn predicate_filters() {
        let feed = ChangeFeed::new(16);
        let sub = feed.subscribe(Arc::new(|doc: &Document| {
            doc.as_event().is_some_and(|e| e.title.starts_with('k'))
        }));

        feed.emit(created(event("kiln")));
        feed.emit(created(event("pottery")));
        assert_eq!(sub.iter().count(), 1);
    }

    #[test]
    fn cancelled_subscription_receives_nothing() {
        let feed = ChangeFeed::new(16);
        let sub = feed.subscribe(all());
        feed.emit(created(event("a")));
        sub.cancel();
        feed.emit(created(event("b")));

        assert!(sub.is_cancelled());
        assert!(sub.try_next().is_none());
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn redelivery_is_at_least_once() {
        let feed = ChangeFeed::new(2);
        let sub = feed.subscribe(all());
        for title in ["a", "b", "c"] {
            feed.emit(created(event(title)));
        }
        assert_eq!(sub.poll(10).len(), 3);

        // Only the last two are retained.
        assert_eq!(sub.redeliver_from(1), 2);
        assert_eq!(sub.try_next().map(|c| c.sequence), Some(2));
    }

    #[test]
    fn callbacks_run_on_emit() {
        let feed = Arc::new(ChangeFeed::new(16));
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let id = feed.subscribe_with(
            all(),
            Arc::new(move |_: &Change| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        feed.emit(created(event("a")));
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        assert!(feed.unsubscribe(id));
        feed.emit(created(event("b")));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reentrant_emit_keeps_order() {
        let feed = Arc::new(ChangeFeed::new(16));
        let order = Arc::new(Mutex::new(Vec::new()));

        let inner = Arc::clone(&feed);
        let log = Arc::clone(&order);
        feed.subscribe_with(
            all(),
            Arc::new(move |change: &Change| {
                log.lock().push(change.sequence);
                if change.sequence == 1 {
                    inner.emit(created(event("nested")));
                }
            }),
        );

        feed.emit(created(event("outer")));
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn close_cancels_everything() {
        let feed = ChangeFeed::new(16);
        let sub = feed.subscribe(all());
        feed.close();
        assert!(sub.is_cancelled());
        assert_eq!(feed.emit(created(event("late"))), None);
    }
}
