//! Remote document store interface and an in-process implementation.

use crate::auth::{AuthToken, Session, TokenValidator};
use crate::error::{ConflictError, SyncError, SyncResult};
use evlot_model::{changed_fields, Clock, DocKey, Document, FieldMap, Timestamp, UserId};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// What a mutation does.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOp {
    /// Writes `changed` fields; creates the document from `fields` when absent.
    Put {
        /// Full field map at the time of the write.
        fields: FieldMap,
        /// Fields the write changed.
        changed: Vec<String>,
    },
    /// Deletes the document.
    Delete,
}

/// A write sent to the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// Target document.
    pub key: DocKey,
    /// The change.
    pub op: MutationOp,
    /// User the write is attributed to.
    pub author: UserId,
    /// Session token proving the author.
    pub token: AuthToken,
    /// Local clock at the time of the write.
    pub local_at: Timestamp,
}

/// A document version as held by the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    /// Change-log sequence that produced this version.
    pub seq: u64,
    /// Document key.
    pub key: DocKey,
    /// Field values, or `None` once deleted.
    pub fields: Option<FieldMap>,
    /// Server time each field was last written.
    pub field_times: BTreeMap<String, Timestamp>,
    /// Server time of the last write.
    pub updated_at: Timestamp,
    /// Author of the last write.
    pub updated_by: UserId,
}

impl RemoteRecord {
    /// Returns true if this version is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.fields.is_none()
    }
}

/// One page of the remote change log.
#[derive(Debug, Clone, Default)]
pub struct PullBatch {
    /// Changes after the requested cursor, oldest first.
    pub changes: Vec<RemoteRecord>,
    /// Cursor to pass to the next pull.
    pub cursor: u64,
    /// Whether more changes are waiting.
    pub has_more: bool,
}

/// Acknowledgement of an accepted write.
#[derive(Debug, Clone, PartialEq)]
pub struct PushAck {
    /// Change-log sequence of the write.
    pub seq: u64,
    /// Server time assigned to the written fields.
    pub server_time: Timestamp,
    /// Fields stamped with `server_time`.
    pub fields: Vec<String>,
}

/// A remote document database with a change log.
///
/// Implementations assign server timestamps, keep tombstones for deleted
/// documents and reject writes without a valid token.
pub trait RemoteStore: Send + Sync {
    /// Returns changes with sequence greater than `cursor`.
    fn pull(&self, cursor: u64, limit: u32) -> SyncResult<PullBatch>;

    /// Applies a mutation.
    ///
    /// Fails with [`SyncError::Conflict`] if the document was deleted or the
    /// resulting document is rejected.
    fn push(&self, mutation: &Mutation) -> SyncResult<PushAck>;

    /// Returns the current version of a document, including tombstones.
    fn fetch(&self, key: DocKey) -> SyncResult<Option<RemoteRecord>>;

    /// Creates a document only if nothing (not even a tombstone) exists at
    /// its key; fails with [`SyncError::AlreadyExists`] otherwise.
    fn create_if_absent(&self, mutation: &Mutation) -> SyncResult<PushAck>;

    /// Checks that writes made with `session` would be accepted.
    fn verify_session(&self, session: &Session) -> SyncResult<()>;
}

#[derive(Default)]
struct RemoteState {
    docs: HashMap<DocKey, RemoteRecord>,
    log: Vec<RemoteRecord>,
    last_time: Timestamp,
}

impl RemoteState {
    fn next_time(&mut self, clock: &dyn Clock) -> Timestamp {
        let now = clock.now();
        let next = if now > self.last_time {
            now
        } else {
            Timestamp::from_millis(self.last_time.as_millis() + 1)
        };
        self.last_time = next;
        next
    }

    fn commit(&mut self, mut record: RemoteRecord) -> u64 {
        let seq = self.log.len() as u64 + 1;
        record.seq = seq;
        self.docs.insert(record.key, record.clone());
        self.log.push(record);
        seq
    }
}

#[derive(Debug, Clone)]
struct Fault {
    remaining: u32,
    retryable: bool,
}

/// An in-process remote store.
///
/// Validates documents the way a server-side rule set would, stamps every
/// write with a strictly increasing server time and supports fault
/// injection for tests.
pub struct MemoryRemote {
    validator: TokenValidator,
    clock: Arc<dyn Clock>,
    state: RwLock<RemoteState>,
    fault: Mutex<Option<Fault>>,
}

impl MemoryRemote {
    /// Creates an empty remote.
    pub fn new(validator: TokenValidator, clock: Arc<dyn Clock>) -> Self {
        Self {
            validator,
            clock,
            state: RwLock::new(RemoteState::default()),
            fault: Mutex::new(None),
        }
    }

    /// Makes the next `count` calls fail with a transport error.
    pub fn fail_next(&self, count: u32, retryable: bool) {
        *self.fault.lock() = Some(Fault {
            remaining: count,
            retryable,
        });
    }

    /// Writes a document directly, bypassing authentication.
    ///
    /// Used to load fixtures and snapshots.
    pub fn seed(&self, doc: &Document) -> SyncResult<u64> {
        doc.validate()?;
        let fields = doc.to_fields()?;
        let mut state = self.state.write();
        let at = state.next_time(self.clock.as_ref());
        let record = RemoteRecord {
            seq: 0,
            key: doc.key(),
            field_times: fields.keys().map(|name| (name.clone(), at)).collect(),
            fields: Some(fields),
            updated_at: at,
            updated_by: UserId::new("seed"),
        };
        Ok(state.commit(record))
    }

    /// Returns every live document.
    pub fn documents(&self) -> SyncResult<Vec<Document>> {
        let state = self.state.read();
        let mut docs = state
            .docs
            .values()
            .filter_map(|record| record.fields.as_ref().map(|f| (record.key, f)))
            .map(|(key, fields)| Document::from_fields(key, fields))
            .collect::<Result<Vec<_>, _>>()?;
        docs.sort_by_key(Document::key);
        Ok(docs)
    }

    /// Returns the length of the change log.
    pub fn log_len(&self) -> u64 {
        self.state.read().log.len() as u64
    }

    fn check_fault(&self) -> SyncResult<()> {
        let mut fault = self.fault.lock();
        if let Some(f) = fault.as_mut() {
            if f.remaining > 0 {
                f.remaining -= 1;
                let retryable = f.retryable;
                if f.remaining == 0 {
                    *fault = None;
                }
                return Err(SyncError::Transport {
                    message: "injected failure".into(),
                    retryable,
                });
            }
        }
        Ok(())
    }

    fn authorize(&self, mutation: &Mutation) -> SyncResult<()> {
        self.validator
            .validate_for(&mutation.token, &mutation.author, self.clock.now())?;
        Ok(())
    }

    fn apply_put(
        &self,
        state: &mut RemoteState,
        mutation: &Mutation,
        fields: &FieldMap,
        changed: &[String],
    ) -> SyncResult<PushAck> {
        let key = mutation.key;
        let previous = state.docs.get(&key).cloned();

        let (merged, mut field_times, written) = match &previous {
            Some(record) => match &record.fields {
                None => {
                    return Err(ConflictError::new(key, "document was deleted remotely").into())
                }
                Some(current) => {
                    let mut merged = current.clone();
                    for name in changed {
                        match fields.get(name) {
                            Some(value) => merged.insert(name.clone(), value.clone()),
                            None => merged.remove(name),
                        };
                    }
                    let written = changed_fields(current, &merged);
                    (merged, record.field_times.clone(), written)
                }
            },
            None => {
                let written: Vec<String> = fields.keys().cloned().collect();
                (fields.clone(), BTreeMap::new(), written)
            }
        };

        let doc = Document::from_fields(key, &merged)
            .map_err(|e| ConflictError::new(key, format!("rejected: {e}")))?;
        if let Some(prev) = previous
            .as_ref()
            .and_then(|r| r.fields.as_ref())
            .map(|f| Document::from_fields(key, f))
            .transpose()?
        {
            doc.validate_update(&prev)
                .map_err(|e| ConflictError::new(key, format!("rejected: {e}")))?;
        }

        let at = state.next_time(self.clock.as_ref());
        for name in &written {
            field_times.insert(name.clone(), at);
        }
        field_times.retain(|name, _| merged.contains_key(name));

        let seq = state.commit(RemoteRecord {
            seq: 0,
            key,
            fields: Some(merged),
            field_times,
            updated_at: at,
            updated_by: mutation.author.clone(),
        });
        debug!(%key, seq, fields = written.len(), "remote put");
        Ok(PushAck {
            seq,
            server_time: at,
            fields: written,
        })
    }
}

impl RemoteStore for MemoryRemote {
    fn pull(&self, cursor: u64, limit: u32) -> SyncResult<PullBatch> {
        self.check_fault()?;
        let state = self.state.read();
        let start = usize::try_from(cursor).unwrap_or(usize::MAX).min(state.log.len());
        let end = start.saturating_add(limit.max(1) as usize).min(state.log.len());
        let changes = state.log[start..end].to_vec();
        Ok(PullBatch {
            cursor: end as u64,
            has_more: end < state.log.len(),
            changes,
        })
    }

    fn push(&self, mutation: &Mutation) -> SyncResult<PushAck> {
        self.check_fault()?;
        self.authorize(mutation)?;
        let mut state = self.state.write();
        match &mutation.op {
            MutationOp::Put { fields, changed } => {
                self.apply_put(&mut state, mutation, fields, changed)
            }
            MutationOp::Delete => {
                let key = mutation.key;
                match state.docs.get(&key) {
                    None => return Err(SyncError::NotFound { key }),
                    Some(record) if record.is_deleted() => {
                        return Err(ConflictError::new(key, "document was deleted remotely").into())
                    }
                    Some(_) => {}
                }
                if key.collection == evlot_model::Collection::Draws {
                    return Err(ConflictError::new(key, "draw records cannot be deleted").into());
                }
                let at = state.next_time(self.clock.as_ref());
                let seq = state.commit(RemoteRecord {
                    seq: 0,
                    key,
                    fields: None,
                    field_times: BTreeMap::new(),
                    updated_at: at,
                    updated_by: mutation.author.clone(),
                });
                debug!(%key, seq, "remote delete");
                Ok(PushAck {
                    seq,
                    server_time: at,
                    fields: Vec::new(),
                })
            }
        }
    }

    fn fetch(&self, key: DocKey) -> SyncResult<Option<RemoteRecord>> {
        self.check_fault()?;
        Ok(self.state.read().docs.get(&key).cloned())
    }

    fn create_if_absent(&self, mutation: &Mutation) -> SyncResult<PushAck> {
        self.check_fault()?;
        self.authorize(mutation)?;
        let MutationOp::Put { fields, changed } = &mutation.op else {
            return Err(SyncError::transport_fatal("conditional create requires a put"));
        };
        let mut state = self.state.write();
        if state.docs.contains_key(&mutation.key) {
            return Err(SyncError::AlreadyExists { key: mutation.key });
        }
        self.apply_put(&mut state, mutation, fields, changed)
    }

    fn verify_session(&self, session: &Session) -> SyncResult<()> {
        self.validator
            .validate_for(&session.token, &session.user_id, self.clock.now())?;
        Ok(())
    }
}
