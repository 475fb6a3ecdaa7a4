//! Thought and context storage for one session.

use crate::changes::{diff_fields, ChangeBatch, RawChange};
use crate::database::{
    create_tables, decode, encode, get_record, records_in, Database, Record, CONTEXTS_TABLE,
    HELPERS_TABLE, LOGS_TABLE, THOUGHTS_TABLE, THOUGHT_WORDS_TABLE, WORD_POSTINGS_TABLE,
};
use crate::error::{storage, KeyFailure, Result, StoreError};
use crate::session::{EchoMark, Session};
use crate::subscription::SubscriptionHandle;
use crate::types::{Context, LogEntry, ThoughtPath, Thought};
use crate::RecordId;
use redb::ReadableTable;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// A session's view of the database.
///
/// Every mutation is stamped with this session's id and a fresh timestamp,
/// runs in its own write transaction, and is published to change subscribers
/// once committed. Clones share the session and the subscription.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
    session: Arc<Session>,
    pub(crate) subscription: Arc<Mutex<Option<SubscriptionHandle>>>,
}

impl Store {
    pub(crate) fn new(db: Arc<Database>, session: Arc<Session>) -> Self {
        Self {
            db,
            session,
            subscription: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns the shared database.
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Returns this store's session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    // Thoughts

    /// Returns a thought by id.
    pub fn get_thought_by_id(&self, id: &RecordId) -> Result<Option<Thought>> {
        self.db.read_record(id)
    }

    /// Returns thoughts aligned to `ids`; missing entries are `None`.
    pub fn get_thoughts_by_ids(&self, ids: &[RecordId]) -> Result<Vec<Option<Thought>>> {
        self.read_many(ids)
    }

    /// Returns every thought.
    pub fn get_thought_index(&self) -> Result<BTreeMap<RecordId, Thought>> {
        self.db.read_all()
    }

    /// Writes a thought under `id` and returns it as stored.
    ///
    /// # Errors
    ///
    /// Returns `TransactionFailure` if the thought has no context or the
    /// engine rejects the write.
    pub fn update_thought(&self, id: RecordId, thought: Thought) -> Result<Thought> {
        let (stored, change) = self.put_record(id, thought)?;
        self.publish(vec![change]);
        Ok(stored)
    }

    /// Writes or deletes (`None`) many thoughts, each key independently.
    ///
    /// # Errors
    ///
    /// Returns `PartialBulkFailure` listing the keys that failed. Every other
    /// key is written.
    pub fn update_thought_index(
        &self,
        updates: impl IntoIterator<Item = (RecordId, Option<Thought>)>,
    ) -> Result<()> {
        self.write_many(updates)
    }

    /// Deletes a thought and its word index entry. Deleting an absent thought
    /// is not an error.
    pub fn delete_thought(&self, id: &RecordId) -> Result<()> {
        if let Some(change) = self.delete_record::<Thought>(id)? {
            self.publish(vec![change]);
        }
        Ok(())
    }

    // Contexts

    /// Returns a context by id.
    pub fn get_context_by_id(&self, id: &RecordId) -> Result<Option<Context>> {
        self.db.read_record(id)
    }

    /// Returns contexts aligned to `ids`; missing entries are `None`.
    pub fn get_contexts_by_ids(&self, ids: &[RecordId]) -> Result<Vec<Option<Context>>> {
        self.read_many(ids)
    }

    /// Returns every context.
    pub fn get_context_index(&self) -> Result<BTreeMap<RecordId, Context>> {
        self.db.read_all()
    }

    /// Returns every context's path, keyed by context id.
    pub fn get_context_paths(&self) -> Result<BTreeMap<RecordId, ThoughtPath>> {
        Ok(self
            .get_context_index()?
            .into_iter()
            .map(|(id, context)| (id, context.context))
            .collect())
    }

    /// Writes a context under `id` and returns it as stored.
    ///
    /// # Errors
    ///
    /// Returns `TransactionFailure` if a non-root context has no children or
    /// the engine rejects the write.
    pub fn update_context(&self, id: RecordId, context: Context) -> Result<Context> {
        let (stored, change) = self.put_record(id, context)?;
        self.publish(vec![change]);
        Ok(stored)
    }

    /// Writes or deletes (`None`) many contexts, each key independently.
    pub fn update_context_index(
        &self,
        updates: impl IntoIterator<Item = (RecordId, Option<Context>)>,
    ) -> Result<()> {
        self.write_many(updates)
    }

    /// Deletes a context. Deleting an absent context is not an error.
    pub fn delete_context(&self, id: &RecordId) -> Result<()> {
        if let Some(change) = self.delete_record::<Context>(id)? {
            self.publish(vec![change]);
        }
        Ok(())
    }

    /// Returns the children of a context as thoughts, in rank order.
    ///
    /// A child whose thought is missing is reported and replaced by an
    /// unpersisted placeholder, so traversal never fails on a dangling key.
    pub fn children_of(&self, context_id: &RecordId) -> Result<Vec<Thought>> {
        let read_txn = self.db.begin_read()?;
        let contexts = read_txn
            .open_table(CONTEXTS_TABLE)
            .map_err(storage("Failed to open context table"))?;
        let Some(context) = get_record::<Context>(&contexts, context_id)? else {
            return Ok(Vec::new());
        };

        let thoughts = read_txn
            .open_table(THOUGHTS_TABLE)
            .map_err(storage("Failed to open thought table"))?;

        let mut children = Vec::with_capacity(context.children.len());
        for child in context.ranked_children() {
            match get_record::<Thought>(&thoughts, &child.key)? {
                Some(thought) => children.push(thought),
                None => {
                    let violation = StoreError::IntegrityViolation {
                        context: *context_id,
                        child: child.key,
                    };
                    warn!(error = %violation, "Substituting placeholder thought");
                    children.push(Thought::placeholder(child.key, *context_id));
                }
            }
        }
        Ok(children)
    }

    // Maintenance

    /// Empties the thought, context and helper tables along with the word
    /// index. The helper row is recreated with defaults on next access. Logs
    /// are kept.
    pub fn clear_all(&self) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        // collected under the write lock so every removed record gets a Deleted event
        let thoughts: BTreeMap<RecordId, Thought> = records_in(&write_txn)?;
        let contexts: BTreeMap<RecordId, Context> = records_in(&write_txn)?;
        write_txn
            .delete_table(THOUGHTS_TABLE)
            .map_err(storage("Failed to clear thoughtIndex"))?;
        write_txn
            .delete_table(CONTEXTS_TABLE)
            .map_err(storage("Failed to clear contextIndex"))?;
        write_txn
            .delete_table(THOUGHT_WORDS_TABLE)
            .map_err(storage("Failed to clear thoughtWordsIndex"))?;
        write_txn
            .delete_table(WORD_POSTINGS_TABLE)
            .map_err(storage("Failed to clear wordPostings"))?;
        write_txn
            .delete_table(HELPERS_TABLE)
            .map_err(storage("Failed to clear helpers"))?;
        create_tables(&write_txn)?;
        write_txn.commit().map_err(storage("Failed to commit"))?;

        let mut changes = Vec::with_capacity(thoughts.len() + contexts.len());
        for (id, thought) in &thoughts {
            self.session
                .record_echo(Thought::TABLE, *id, EchoMark::Delete);
            changes.push(RawChange::deleted(Thought::TABLE, *id, thought.to_value()?));
        }
        for (id, context) in &contexts {
            self.session
                .record_echo(Context::TABLE, *id, EchoMark::Delete);
            changes.push(RawChange::deleted(Context::TABLE, *id, context.to_value()?));
        }
        self.publish(changes);

        info!(
            thoughts = thoughts.len(),
            contexts = contexts.len(),
            "Cleared store"
        );
        Ok(())
    }

    /// Appends a diagnostic entry and returns its id.
    pub fn log(&self, message: &str, stack: Option<&str>) -> Result<u64> {
        let write_txn = self.db.begin_write()?;
        let id = {
            let mut table = write_txn
                .open_table(LOGS_TABLE)
                .map_err(storage("Failed to open logs table"))?;
            let id = match table.last().map_err(storage("Failed to read logs"))? {
                Some((key, _)) => key.value() + 1,
                None => 1,
            };
            let entry = LogEntry {
                id,
                created: self.session.stamp(),
                message: message.to_string(),
                stack: stack.map(str::to_string),
            };
            let bytes = encode(&entry)?;
            table
                .insert(id, bytes.as_slice())
                .map_err(storage("Failed to write log entry"))?;
            id
        };
        write_txn.commit().map_err(storage("Failed to commit"))?;
        Ok(id)
    }

    /// Returns every log entry, oldest first.
    pub fn get_logs(&self) -> Result<Vec<LogEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn
            .open_table(LOGS_TABLE)
            .map_err(storage("Failed to open logs table"))?;
        let mut entries = Vec::new();
        for entry in table.iter().map_err(storage("Failed to iterate logs"))? {
            let (_, value) = entry.map_err(storage("Failed to read log entry"))?;
            entries.push(decode(value.value())?);
        }
        Ok(entries)
    }

    // Write path

    fn read_many<R: Record>(&self, ids: &[RecordId]) -> Result<Vec<Option<R>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn
            .open_table(R::DEFINITION)
            .map_err(storage("Failed to open record table"))?;
        ids.iter().map(|id| get_record(&table, id)).collect()
    }

    /// Stamps, validates and writes one record together with its derived
    /// index entries, in a single write transaction.
    fn put_record<R: Record>(&self, id: RecordId, mut record: R) -> Result<(R, RawChange)> {
        let failure = |reason: String| StoreError::TransactionFailure {
            table: R::TABLE.as_str(),
            key: id,
            reason,
        };

        let write_txn = self.db.begin_write()?;
        let previous = {
            let mut table = write_txn
                .open_table(R::DEFINITION)
                .map_err(|e| failure(e.to_string()))?;
            let previous: Option<R> = get_record(&table, &id)?;

            record.stamp(id, self.session.id(), self.session.stamp(), previous.as_ref());
            record.validate().map_err(failure)?;

            let bytes = encode(&record)?;
            table
                .insert(id.as_bytes(), bytes.as_slice())
                .map_err(|e| failure(e.to_string()))?;
            previous
        };
        R::after_write(&write_txn, &record, previous.as_ref())?;
        write_txn.commit().map_err(|e| failure(e.to_string()))?;

        self.session
            .record_echo(R::TABLE, id, EchoMark::Write(record.last_updated()));

        let change = match previous {
            None => RawChange::created(R::TABLE, id, record.to_value()?),
            Some(previous) => {
                let old = previous.to_value()?;
                let mods = diff_fields(&old, &record.to_value()?);
                RawChange::updated(R::TABLE, id, mods, old)
            }
        };
        debug!(table = %R::TABLE, key = %id, ts = record.last_updated(), "Wrote record");
        Ok((record, change))
    }

    /// Deletes one record and its derived index entries. Returns `None` when
    /// the record did not exist.
    fn delete_record<R: Record>(&self, id: &RecordId) -> Result<Option<RawChange>> {
        let failure = |reason: String| StoreError::TransactionFailure {
            table: R::TABLE.as_str(),
            key: *id,
            reason,
        };

        let write_txn = self.db.begin_write()?;
        let removed: Option<R> = {
            let mut table = write_txn
                .open_table(R::DEFINITION)
                .map_err(|e| failure(e.to_string()))?;
            let removed = table
                .remove(id.as_bytes())
                .map_err(|e| failure(e.to_string()))?;
            match removed {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            }
        };
        R::after_delete(&write_txn, id)?;
        write_txn.commit().map_err(|e| failure(e.to_string()))?;

        let Some(removed) = removed else {
            debug!(table = %R::TABLE, key = %id, "Delete of absent record");
            return Ok(None);
        };
        self.session.record_echo(R::TABLE, *id, EchoMark::Delete);
        debug!(table = %R::TABLE, key = %id, "Deleted record");
        Ok(Some(RawChange::deleted(R::TABLE, *id, removed.to_value()?)))
    }

    fn write_many<R: Record>(
        &self,
        updates: impl IntoIterator<Item = (RecordId, Option<R>)>,
    ) -> Result<()> {
        let mut changes = Vec::new();
        let mut failures = Vec::new();

        for (id, update) in updates {
            let outcome = match update {
                Some(record) => self.put_record(id, record).map(|(_, change)| Some(change)),
                None => self.delete_record::<R>(&id),
            };
            match outcome {
                Ok(Some(change)) => changes.push(change),
                Ok(None) => {}
                Err(error) => {
                    warn!(table = %R::TABLE, key = %id, error = %error, "Bulk write key failed");
                    failures.push(KeyFailure { key: id, error });
                }
            }
        }

        self.publish(changes);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(StoreError::PartialBulkFailure { failures })
        }
    }

    fn publish(&self, changes: Vec<RawChange>) {
        self.db
            .publish(ChangeBatch::new(self.session.id(), changes));
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("session", &self.session.id())
            .field("path", &self.db.path())
            .finish()
    }
}
