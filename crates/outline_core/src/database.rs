//! The shared on-device database.
//!
//! One [`Database`] is opened per process and shared by every [`Store`]
//! (one store per tab/session). All tables live in a single redb file; values
//! are postcard-encoded and keyed by the raw 32-byte record id.

use crate::changes::{ChangeBatch, ChangeHub};
use crate::config::Config;
use crate::error::{storage, Result, StoreError};
use crate::session::Session;
use crate::store::Store;
use crate::types::{Context, Table, Thought, Timestamp};
use crate::{word_index, RecordId};
use crossbeam_channel::Receiver;
use redb::{ReadableTable, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Store schema version for migration support.
pub const STORE_SCHEMA_VERSION: u32 = 1;

/// Primary record tables: id -> postcard record.
pub(crate) type RecordTable = TableDefinition<'static, &'static [u8; 32], &'static [u8]>;

// Table definitions
pub(crate) const METADATA_TABLE: TableDefinition<&str, u32> = TableDefinition::new("metadata");
pub(crate) const THOUGHTS_TABLE: RecordTable = TableDefinition::new("thoughtIndex");
pub(crate) const CONTEXTS_TABLE: RecordTable = TableDefinition::new("contextIndex");
pub(crate) const THOUGHT_WORDS_TABLE: TableDefinition<&[u8; 32], &[u8]> =
    TableDefinition::new("thoughtWordsIndex");
pub(crate) const WORD_POSTINGS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("wordPostings");
pub(crate) const HELPERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("helpers");
pub(crate) const LOGS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("logs");

/// Handle to the on-device database.
pub struct Database {
    db: redb::Database,
    path: PathBuf,
    config: Config,
    hub: ChangeHub,
}

impl Database {
    /// Opens (or creates) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the file or its tables cannot be
    /// opened, and `SchemaVersionMismatch` if the file was written by an
    /// incompatible version.
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(storage("Failed to create store directory"))?;
        }

        let db = redb::Database::create(&path).map_err(storage("Failed to open database"))?;
        initialize(&db)?;

        info!(path = %path.display(), "Opened outline database");

        let hub = ChangeHub::new(config.subscription.channel_capacity);
        Ok(Arc::new(Self {
            db,
            path,
            config,
            hub,
        }))
    }

    /// Opens the database inside a store directory, reading `config.toml` from
    /// it when present.
    pub fn open_dir(store_dir: impl AsRef<Path>) -> Result<Arc<Self>> {
        let store_dir = store_dir.as_ref();
        std::fs::create_dir_all(store_dir).map_err(storage("Failed to create store directory"))?;
        let config = Config::load(store_dir)?;
        let path = store_dir.join(&config.storage.file_name);
        Self::open(path, config)
    }

    /// Returns the path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the configuration the database was opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opens a store for a new session.
    pub fn connect(self: &Arc<Self>) -> Store {
        let session =
            Session::new().with_echo_capacity(self.config.subscription.echo_capacity);
        self.connect_with(session)
    }

    /// Opens a store for a caller-provided session.
    pub fn connect_with(self: &Arc<Self>, session: Session) -> Store {
        debug!(session = session.id(), "Connecting store");
        Store::new(Arc::clone(self), Arc::new(session))
    }

    /// Injects a change batch received from another process's feed, delivering
    /// it to every subscriber as if it had been committed locally.
    pub fn relay(&self, batch: ChangeBatch) {
        self.hub.publish(batch);
    }

    /// Number of live change subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    pub(crate) fn publish(&self, batch: ChangeBatch) {
        self.hub.publish(batch);
    }

    pub(crate) fn subscribe_changes(&self) -> Receiver<Arc<ChangeBatch>> {
        self.hub.subscribe()
    }

    pub(crate) fn begin_read(&self) -> Result<redb::ReadTransaction> {
        self.db
            .begin_read()
            .map_err(storage("Failed to begin read transaction"))
    }

    pub(crate) fn begin_write(&self) -> Result<redb::WriteTransaction> {
        self.db
            .begin_write()
            .map_err(storage("Failed to begin write transaction"))
    }

    /// Reads one record in its own snapshot.
    pub(crate) fn read_record<R: Record>(&self, id: &RecordId) -> Result<Option<R>> {
        let read_txn = self.begin_read()?;
        let table = read_txn
            .open_table(R::DEFINITION)
            .map_err(storage("Failed to open record table"))?;
        get_record(&table, id)
    }

    /// Reads every record of a table in one snapshot.
    pub(crate) fn read_all<R: Record>(&self) -> Result<BTreeMap<RecordId, R>> {
        let read_txn = self.begin_read()?;
        let table = read_txn
            .open_table(R::DEFINITION)
            .map_err(storage("Failed to open record table"))?;

        let mut records = BTreeMap::new();
        for entry in table.iter().map_err(storage("Failed to iterate records"))? {
            let (key, value) = entry.map_err(storage("Failed to read record"))?;
            let record: R = decode(value.value())?;
            records.insert(RecordId::from_bytes(*key.value()), record);
        }
        Ok(records)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("subscribers", &self.hub.subscriber_count())
            .finish()
    }
}

/// Verifies the schema version and creates any missing table.
fn initialize(db: &redb::Database) -> Result<()> {
    let write_txn = db
        .begin_write()
        .map_err(storage("Failed to begin write transaction"))?;

    {
        let mut metadata = write_txn
            .open_table(METADATA_TABLE)
            .map_err(storage("Failed to open metadata table"))?;
        let found = metadata
            .get("version")
            .map_err(storage("Failed to read schema version"))?
            .map(|v| v.value());

        match found {
            Some(version) if version != STORE_SCHEMA_VERSION => {
                return Err(StoreError::SchemaVersionMismatch {
                    found: version,
                    expected: STORE_SCHEMA_VERSION,
                });
            }
            Some(_) => {}
            None => {
                metadata
                    .insert("version", STORE_SCHEMA_VERSION)
                    .map_err(storage("Failed to insert version"))?;
            }
        }
    }

    create_tables(&write_txn)?;

    write_txn.commit().map_err(storage("Failed to commit"))?;
    Ok(())
}

/// Opens every data table once so later read transactions find them.
pub(crate) fn create_tables(txn: &WriteTransaction) -> Result<()> {
    txn.open_table(THOUGHTS_TABLE)
        .map_err(storage("Failed to create thought table"))?;
    txn.open_table(CONTEXTS_TABLE)
        .map_err(storage("Failed to create context table"))?;
    txn.open_table(THOUGHT_WORDS_TABLE)
        .map_err(storage("Failed to create words table"))?;
    txn.open_table(WORD_POSTINGS_TABLE)
        .map_err(storage("Failed to create postings table"))?;
    txn.open_table(HELPERS_TABLE)
        .map_err(storage("Failed to create helpers table"))?;
    txn.open_table(LOGS_TABLE)
        .map_err(storage("Failed to create logs table"))?;
    Ok(())
}

/// Reads every record of `R` inside an open write transaction. The table
/// handle is released before returning so the caller may delete the table.
pub(crate) fn records_in<R: Record>(txn: &WriteTransaction) -> Result<BTreeMap<RecordId, R>> {
    let table = txn
        .open_table(R::DEFINITION)
        .map_err(storage("Failed to open record table"))?;

    let mut records = BTreeMap::new();
    for entry in table.iter().map_err(storage("Failed to iterate records"))? {
        let (key, value) = entry.map_err(storage("Failed to read record"))?;
        records.insert(RecordId::from_bytes(*key.value()), decode(value.value())?);
    }
    Ok(records)
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    postcard::to_allocvec(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    postcard::from_bytes(bytes).map_err(|e| StoreError::Deserialization(e.to_string()))
}

/// Reads and decodes one record from an open table.
pub(crate) fn get_record<R: Record>(
    table: &impl ReadableTable<&'static [u8; 32], &'static [u8]>,
    id: &RecordId,
) -> Result<Option<R>> {
    let bytes = table
        .get(id.as_bytes())
        .map_err(storage("Failed to read record"))?;
    match bytes {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

/// A record type stored in one of the primary tables.
///
/// Write-path side effects that must commit atomically with the record (the
/// word index for thoughts) hang off `after_write`/`after_delete`, which run
/// inside the same write transaction.
pub(crate) trait Record: Clone + Serialize + DeserializeOwned + Send + 'static {
    const TABLE: Table;
    const DEFINITION: RecordTable;

    /// Stamps identity, origin and time before the record is written.
    fn stamp(&mut self, id: RecordId, session_id: &str, now: Timestamp, previous: Option<&Self>);

    /// Structural checks a record must pass to be written.
    fn validate(&self) -> std::result::Result<(), String>;

    fn to_value(&self) -> Result<Value>;

    fn from_value(value: Value) -> Result<Self>;

    fn last_updated(&self) -> Timestamp;

    fn updated_by(&self) -> &str;

    fn after_write(_txn: &WriteTransaction, _record: &Self, _previous: Option<&Self>) -> Result<()> {
        Ok(())
    }

    fn after_delete(_txn: &WriteTransaction, _id: &RecordId) -> Result<()> {
        Ok(())
    }
}

impl Record for Thought {
    const TABLE: Table = Table::ThoughtIndex;
    const DEFINITION: RecordTable = THOUGHTS_TABLE;

    fn stamp(&mut self, id: RecordId, session_id: &str, now: Timestamp, previous: Option<&Self>) {
        self.id = id;
        self.created = match previous {
            Some(prev) if prev.created != 0 => prev.created,
            _ if self.created != 0 => self.created,
            _ => now,
        };
        self.last_updated = now;
        self.updated_by = session_id.to_string();
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.contexts.is_empty() {
            return Err("thought must belong to at least one context".to_string());
        }
        Ok(())
    }

    fn to_value(&self) -> Result<Value> {
        Thought::to_value(self)
    }

    fn from_value(value: Value) -> Result<Self> {
        Thought::from_value(value)
    }

    fn last_updated(&self) -> Timestamp {
        self.last_updated
    }

    fn updated_by(&self) -> &str {
        &self.updated_by
    }

    fn after_write(txn: &WriteTransaction, record: &Self, previous: Option<&Self>) -> Result<()> {
        word_index::index_thought(txn, record, previous)
    }

    fn after_delete(txn: &WriteTransaction, id: &RecordId) -> Result<()> {
        word_index::remove_thought(txn, id)
    }
}

impl Record for Context {
    const TABLE: Table = Table::ContextIndex;
    const DEFINITION: RecordTable = CONTEXTS_TABLE;

    fn stamp(&mut self, id: RecordId, session_id: &str, now: Timestamp, _previous: Option<&Self>) {
        self.id = id;
        self.last_updated = now;
        self.updated_by = session_id.to_string();
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.children.is_empty() && !self.is_root() {
            return Err("context must have at least one child".to_string());
        }
        if let Some(child) = self.children.iter().find(|c| !c.rank.is_finite()) {
            return Err(format!("child {} has a non-finite rank", child.key));
        }
        Ok(())
    }

    fn to_value(&self) -> Result<Value> {
        Context::to_value(self)
    }

    fn from_value(value: Value) -> Result<Self> {
        Context::from_value(value)
    }

    fn last_updated(&self) -> Timestamp {
        self.last_updated
    }

    fn updated_by(&self) -> &str {
        &self.updated_by
    }
}
