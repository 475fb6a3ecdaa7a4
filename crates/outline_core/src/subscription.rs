//! Turns raw change batches into origin-filtered application updates.
//!
//! A [`Normalizer`] reads each [`ChangeBatch`] in delivery order and folds it
//! into one [`IndexUpdates`] value per batch:
//!
//! - Created: the full record, unless the origin filter rejects it.
//! - Updated: the engine only carries a diff, so the current stored record is
//!   read, the diff applied on top, and null relation members stripped.
//! - Deleted: a tombstone, but only for keys the application still holds.
//!
//! The origin filter drops echoes of this session's own writes and anything
//! not newer than what the application already holds. Malformed events are
//! logged and skipped; they never abort the rest of the batch.

use crate::changes::{apply_mods, ChangeBatch, ChangeEvent};
use crate::database::{Database, Record};
use crate::error::Result;
use crate::session::{EchoMark, Origin, Session};
use crate::store::Store;
use crate::types::{Context, Table, Thought, Timestamp};
use crate::RecordId;
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// How long the background loop waits for a batch before re-checking its
/// stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// What the application currently believes about a record.
pub trait LocalState {
    /// The `lastUpdated` the application holds for `key`, or `None` if it
    /// does not hold the key at all.
    fn known_last_updated(&self, table: Table, key: &RecordId) -> Option<Timestamp>;

    /// Every key the application holds for `table`. A resync after lag
    /// tombstones the ones the store no longer has.
    fn known_keys(&self, table: Table) -> Vec<RecordId>;
}

/// The application's state-update entry point.
pub trait UpdateSink: LocalState + Send + Sync {
    /// Applies one normalized batch. Never called with an empty batch.
    fn apply_updates(&self, updates: IndexUpdates);
}

/// Normalized updates from one change batch. `None` is a tombstone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexUpdates {
    /// Thought id -> new record or tombstone.
    pub thought_index_updates: BTreeMap<RecordId, Option<Thought>>,
    /// Context id -> new record or tombstone.
    pub context_index_updates: BTreeMap<RecordId, Option<Context>>,
}

impl IndexUpdates {
    /// Returns true if the batch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.thought_index_updates.is_empty() && self.context_index_updates.is_empty()
    }

    /// Number of keys touched.
    pub fn len(&self) -> usize {
        self.thought_index_updates.len() + self.context_index_updates.len()
    }

    /// Folds `later` into `self`; keys present in both take `later`'s value.
    pub fn merge(&mut self, later: IndexUpdates) {
        self.thought_index_updates
            .extend(later.thought_index_updates);
        self.context_index_updates
            .extend(later.context_index_updates);
    }
}

/// Result of waiting on a pull subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// A batch was received and processed.
    Delivered,
    /// Nothing arrived before the timeout.
    Empty,
    /// The feed dropped this subscriber (it lagged) and will deliver nothing
    /// more. The application should re-read its state.
    Closed,
}

pub(crate) struct Normalizer {
    db: Arc<Database>,
    session: Arc<Session>,
}

impl Normalizer {
    pub(crate) fn new(db: Arc<Database>, session: Arc<Session>) -> Self {
        Self { db, session }
    }

    pub(crate) fn normalize<S: LocalState + ?Sized>(
        &self,
        batch: &ChangeBatch,
        state: &S,
    ) -> IndexUpdates {
        let mut updates = IndexUpdates::default();

        for change in &batch.changes {
            let event = match change.parse() {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        origin = %batch.origin,
                        table = %change.table,
                        key = %change.key,
                        error = %e,
                        "Dropping malformed change event"
                    );
                    continue;
                }
            };

            let key = event.key();
            match event.table() {
                Table::ThoughtIndex => {
                    if let Some(update) = self.resolve::<Thought, S>(event, state) {
                        updates.thought_index_updates.insert(key, update);
                    }
                }
                Table::ContextIndex => {
                    if let Some(update) = self.resolve::<Context, S>(event, state) {
                        updates.context_index_updates.insert(key, update);
                    }
                }
                other => trace!(table = %other, key = %key, "Ignoring change on derived table"),
            }
        }

        debug!(
            origin = %batch.origin,
            events = batch.changes.len(),
            updates = updates.len(),
            "Normalized change batch"
        );
        updates
    }

    /// Returns `Some(update)` when the event produces an update for its key.
    fn resolve<R: Record, S: LocalState + ?Sized>(
        &self,
        event: ChangeEvent,
        state: &S,
    ) -> Option<Option<R>> {
        match event {
            ChangeEvent::Created { key, record, .. } => {
                let record = self.decode::<R>(key, record)?;
                self.should_include(key, &record, state)
                    .then_some(Some(record))
            }
            ChangeEvent::Updated { key, mods, .. } => {
                let current = match self.db.read_record::<R>(&key) {
                    Ok(Some(current)) => current,
                    Ok(None) => {
                        debug!(table = %R::TABLE, key = %key, "Updated event for absent record");
                        return None;
                    }
                    Err(e) => {
                        warn!(table = %R::TABLE, key = %key, error = %e, "Failed to read record for update");
                        return None;
                    }
                };
                let mut merged = match current.to_value() {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(table = %R::TABLE, key = %key, error = %e, "Failed to encode stored record");
                        return None;
                    }
                };
                apply_mods(&mut merged, &mods);
                let record = self.decode::<R>(key, merged)?;
                self.should_include(key, &record, state)
                    .then_some(Some(record))
            }
            ChangeEvent::Deleted {
                key, old_record, ..
            } => {
                if self.session.take_echo(R::TABLE, key, EchoMark::Delete) {
                    trace!(table = %R::TABLE, key = %key, "Suppressing echo of local delete");
                    return None;
                }
                let known = state.known_last_updated(R::TABLE, &key)?;
                // a foreign producer may omit the stamp; then the delete wins
                let stamped = old_record
                    .get("lastUpdated")
                    .is_some_and(|ts| !ts.is_null());
                let old = self.decode::<R>(key, old_record)?;
                if stamped && known > old.last_updated() {
                    trace!(
                        table = %R::TABLE,
                        key = %key,
                        known,
                        deleted = old.last_updated(),
                        "Ignoring delete of an older version"
                    );
                    return None;
                }
                Some(None)
            }
        }
    }

    fn should_include<R: Record, S: LocalState + ?Sized>(
        &self,
        key: RecordId,
        record: &R,
        state: &S,
    ) -> bool {
        let ts = record.last_updated();
        if self.session.classify(record.updated_by()) == Origin::Local
            && self.session.take_echo(R::TABLE, key, EchoMark::Write(ts))
        {
            trace!(table = %R::TABLE, key = %key, ts, "Suppressing echo of local write");
            return false;
        }
        match state.known_last_updated(R::TABLE, &key) {
            Some(known) if ts <= known => {
                trace!(table = %R::TABLE, key = %key, ts, known, "Suppressing stale change");
                false
            }
            _ => true,
        }
    }

    fn decode<R: Record>(&self, key: RecordId, value: serde_json::Value) -> Option<R> {
        match R::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(table = %R::TABLE, key = %key, error = %e, "Dropping undecodable change payload");
                None
            }
        }
    }

    /// Resynchronizes `state` after the feed dropped us: every stored record
    /// newer than what `state` holds, plus a tombstone for every held key the
    /// store no longer has.
    fn snapshot<S: LocalState + ?Sized>(&self, state: &S) -> Result<IndexUpdates> {
        let thoughts = self.db.read_all::<Thought>()?;
        let contexts = self.db.read_all::<Context>()?;

        let mut updates = IndexUpdates::default();
        for id in state.known_keys(Table::ThoughtIndex) {
            if !thoughts.contains_key(&id) {
                updates.thought_index_updates.insert(id, None);
            }
        }
        for id in state.known_keys(Table::ContextIndex) {
            if !contexts.contains_key(&id) {
                updates.context_index_updates.insert(id, None);
            }
        }
        for (id, thought) in thoughts {
            if is_newer(state, Table::ThoughtIndex, &id, thought.last_updated) {
                updates.thought_index_updates.insert(id, Some(thought));
            }
        }
        for (id, context) in contexts {
            if is_newer(state, Table::ContextIndex, &id, context.last_updated) {
                updates.context_index_updates.insert(id, Some(context));
            }
        }
        Ok(updates)
    }

    fn deliver<S: UpdateSink + ?Sized>(&self, batch: &ChangeBatch, sink: &S) {
        let updates = self.normalize(batch, sink);
        if !updates.is_empty() {
            sink.apply_updates(updates);
        }
    }
}

fn is_newer<S: LocalState + ?Sized>(state: &S, table: Table, id: &RecordId, ts: Timestamp) -> bool {
    state
        .known_last_updated(table, id)
        .map_or(true, |known| ts > known)
}

/// A pull-based change subscription, for callers that drive their own loop.
///
/// Echo suppression consumes the session's echo registry, so a session should
/// use either one pull subscription or [`Store::subscribe`], not both.
pub struct Subscription {
    receiver: Receiver<Arc<ChangeBatch>>,
    normalizer: Normalizer,
}

impl Subscription {
    /// Normalizes one batch against `state` without delivering it.
    pub fn normalize<S: LocalState + ?Sized>(&self, batch: &ChangeBatch, state: &S) -> IndexUpdates {
        self.normalizer.normalize(batch, state)
    }

    /// Waits up to `timeout` for one batch and delivers it to `sink`.
    pub fn process_next<S: UpdateSink + ?Sized>(&self, sink: &S, timeout: Duration) -> FeedStatus {
        match self.receiver.recv_timeout(timeout) {
            Ok(batch) => {
                self.normalizer.deliver(&batch, sink);
                FeedStatus::Delivered
            }
            Err(RecvTimeoutError::Timeout) => FeedStatus::Empty,
            Err(RecvTimeoutError::Disconnected) => FeedStatus::Closed,
        }
    }

    /// Delivers every batch already queued, one at a time. Returns how many
    /// batches were processed, and `Empty` or `Closed` for the feed once
    /// drained. After `Closed` the application should re-read its state.
    pub fn process_pending<S: UpdateSink + ?Sized>(&self, sink: &S) -> (usize, FeedStatus) {
        let mut processed = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(batch) => {
                    self.normalizer.deliver(&batch, sink);
                    processed += 1;
                }
                Err(TryRecvError::Empty) => return (processed, FeedStatus::Empty),
                Err(TryRecvError::Disconnected) => return (processed, FeedStatus::Closed),
            }
        }
    }
}

/// Owns the background subscription thread. Dropping it stops and joins the
/// thread.
pub(crate) struct SubscriptionHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                warn!("Subscription thread panicked");
            }
        }
    }
}

fn run_subscription(
    normalizer: Normalizer,
    mut receiver: Receiver<Arc<ChangeBatch>>,
    sink: Arc<dyn UpdateSink>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Acquire) {
        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(batch) => normalizer.deliver(&batch, sink.as_ref()),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!(
                    session = normalizer.session.id(),
                    "Change feed dropped this subscriber, resynchronizing"
                );
                receiver = normalizer.db.subscribe_changes();
                match normalizer.snapshot(sink.as_ref()) {
                    Ok(updates) if !updates.is_empty() => {
                        debug!(updates = updates.len(), "Resynchronized after lag");
                        sink.apply_updates(updates)
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Failed to resynchronize after lag"),
                }
            }
        }
    }
    debug!(session = normalizer.session.id(), "Subscription loop stopped");
}

impl Store {
    /// Registers `sink` to receive normalized updates on a background thread.
    ///
    /// Batches are processed one at a time, each to completion. Registration
    /// happens at most once per store (clones included): later calls return
    /// `Ok(false)` and leave the existing registration in place.
    pub fn subscribe(&self, sink: Arc<dyn UpdateSink>) -> Result<bool> {
        let mut slot = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            debug!(session = self.session().id(), "Already subscribed");
            return Ok(false);
        }

        let normalizer = Normalizer::new(Arc::clone(self.database()), Arc::clone(self.session()));
        let receiver = self.database().subscribe_changes();
        let stop = Arc::new(AtomicBool::new(false));
        let name: String = self.session().id().chars().take(8).collect();

        let thread = thread::Builder::new()
            .name(format!("outline-sub-{}", name))
            .spawn({
                let stop = Arc::clone(&stop);
                move || run_subscription(normalizer, receiver, sink, stop)
            })?;

        *slot = Some(SubscriptionHandle {
            stop,
            thread: Some(thread),
        });
        info!(session = self.session().id(), "Subscribed to changes");
        Ok(true)
    }

    /// Stops the background subscription. Returns false if none was running.
    pub fn unsubscribe(&self) -> bool {
        let handle = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        handle.is_some()
    }

    /// Opens a pull-based subscription for this session.
    pub fn changes(&self) -> Subscription {
        Subscription {
            receiver: self.database().subscribe_changes(),
            normalizer: Normalizer::new(Arc::clone(self.database()), Arc::clone(self.session())),
        }
    }
}

/// In-memory mirror of the thought and context tables, kept current by
/// applying normalized updates.
#[derive(Debug, Default)]
pub struct MirrorState {
    inner: Mutex<MirrorInner>,
}

#[derive(Debug, Default)]
struct MirrorInner {
    thoughts: BTreeMap<RecordId, Thought>,
    contexts: BTreeMap<RecordId, Context>,
    batches: usize,
}

impl MirrorState {
    /// Creates an empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mirror preloaded with the store's current contents.
    pub fn load(store: &Store) -> Result<Self> {
        let mirror = Self::new();
        {
            let mut inner = mirror.lock();
            inner.thoughts = store.get_thought_index()?;
            inner.contexts = store.get_context_index()?;
        }
        Ok(mirror)
    }

    /// Records a local write the application applied optimistically.
    pub fn record_thought(&self, thought: Thought) {
        self.lock().thoughts.insert(thought.id, thought);
    }

    /// Records a local context write the application applied optimistically.
    pub fn record_context(&self, context: Context) {
        self.lock().contexts.insert(context.id, context);
    }

    pub fn thought(&self, id: &RecordId) -> Option<Thought> {
        self.lock().thoughts.get(id).cloned()
    }

    pub fn context(&self, id: &RecordId) -> Option<Context> {
        self.lock().contexts.get(id).cloned()
    }

    pub fn thoughts(&self) -> BTreeMap<RecordId, Thought> {
        self.lock().thoughts.clone()
    }

    pub fn contexts(&self) -> BTreeMap<RecordId, Context> {
        self.lock().contexts.clone()
    }

    /// Number of non-empty batches applied.
    pub fn batches_applied(&self) -> usize {
        self.lock().batches
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MirrorInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LocalState for MirrorState {
    fn known_last_updated(&self, table: Table, key: &RecordId) -> Option<Timestamp> {
        let inner = self.lock();
        match table {
            Table::ThoughtIndex => inner.thoughts.get(key).map(|t| t.last_updated),
            Table::ContextIndex => inner.contexts.get(key).map(|c| c.last_updated),
            _ => None,
        }
    }

    fn known_keys(&self, table: Table) -> Vec<RecordId> {
        let inner = self.lock();
        match table {
            Table::ThoughtIndex => inner.thoughts.keys().copied().collect(),
            Table::ContextIndex => inner.contexts.keys().copied().collect(),
            _ => Vec::new(),
        }
    }
}

impl UpdateSink for MirrorState {
    fn apply_updates(&self, updates: IndexUpdates) {
        let mut inner = self.lock();
        for (id, update) in updates.thought_index_updates {
            match update {
                Some(thought) => inner.thoughts.insert(id, thought),
                None => inner.thoughts.remove(&id),
            };
        }
        for (id, update) in updates.context_index_updates {
            match update {
                Some(context) => inner.contexts.insert(id, context),
                None => inner.contexts.remove(&id),
            };
        }
        inner.batches += 1;
    }
}
