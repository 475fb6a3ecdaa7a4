//! Low-level change events emitted by the storage layer.
//!
//! Every committed write transaction on the thought or context table is
//! published as one [`ChangeBatch`] to every registered subscriber of the
//! shared [`Database`](crate::Database). The wire shape ([`RawChange`]) is
//! deliberately loose: batches can also come from outside (another process
//! relaying its own feed), so payloads are JSON and are only checked when a
//! subscriber parses them into a typed [`ChangeEvent`].

use crate::error::{Result, StoreError};
use crate::types::Table;
use crate::RecordId;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Change discriminant, numbered like the engine's wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum ChangeType {
    /// A record was inserted.
    Created = 1,
    /// An existing record was modified.
    Updated = 2,
    /// A record was removed.
    Deleted = 3,
}

/// One raw change as delivered by the storage engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChange {
    /// What happened.
    #[serde(rename = "type")]
    pub kind: ChangeType,
    /// Wire name of the table.
    pub table: String,
    /// Hex id of the record.
    pub key: String,
    /// Full new record (Created).
    #[serde(default)]
    pub obj: Option<Value>,
    /// Key path -> new value (Updated).
    #[serde(default)]
    pub mods: Option<Map<String, Value>>,
    /// Record before the change (Updated, Deleted).
    #[serde(default)]
    pub old_obj: Option<Value>,
}

impl RawChange {
    /// A Created change carrying the full new record.
    pub fn created(table: Table, key: RecordId, obj: Value) -> Self {
        Self {
            kind: ChangeType::Created,
            table: table.as_str().to_string(),
            key: key.as_hex(),
            obj: Some(obj),
            mods: None,
            old_obj: None,
        }
    }

    /// An Updated change carrying the modified fields and the prior record.
    pub fn updated(table: Table, key: RecordId, mods: Map<String, Value>, old_obj: Value) -> Self {
        Self {
            kind: ChangeType::Updated,
            table: table.as_str().to_string(),
            key: key.as_hex(),
            obj: None,
            mods: Some(mods),
            old_obj: Some(old_obj),
        }
    }

    /// A Deleted change carrying the removed record.
    pub fn deleted(table: Table, key: RecordId, old_obj: Value) -> Self {
        Self {
            kind: ChangeType::Deleted,
            table: table.as_str().to_string(),
            key: key.as_hex(),
            obj: None,
            mods: None,
            old_obj: Some(old_obj),
        }
    }

    /// Resolves the table name, if known.
    pub fn table(&self) -> Option<Table> {
        Table::from_name(&self.table)
    }

    /// Converts into a typed event, dispatching strictly on `kind`.
    ///
    /// # Errors
    ///
    /// Returns `MalformedChangeEvent` for an unknown table, an unparsable key,
    /// or a missing payload for the change type.
    pub fn parse(&self) -> Result<ChangeEvent> {
        let table = self.table().ok_or_else(|| {
            StoreError::MalformedChangeEvent(format!("unknown table '{}'", self.table))
        })?;
        let key = RecordId::from_hex(&self.key)
            .map_err(|e| StoreError::MalformedChangeEvent(format!("bad key: {}", e)))?;

        match self.kind {
            ChangeType::Created => {
                let record = self.obj.clone().ok_or_else(|| missing("obj", self.kind))?;
                Ok(ChangeEvent::Created { table, key, record })
            }
            ChangeType::Updated => {
                let mods = self.mods.clone().ok_or_else(|| missing("mods", self.kind))?;
                Ok(ChangeEvent::Updated {
                    table,
                    key,
                    mods,
                    old_record: self.old_obj.clone(),
                })
            }
            ChangeType::Deleted => {
                let old_record = self
                    .old_obj
                    .clone()
                    .filter(|v| !v.is_null())
                    .ok_or_else(|| missing("oldObj", self.kind))?;
                Ok(ChangeEvent::Deleted {
                    table,
                    key,
                    old_record,
                })
            }
        }
    }
}

fn missing(field: &str, kind: ChangeType) -> StoreError {
    StoreError::MalformedChangeEvent(format!("{:?} change without {}", kind, field))
}

/// A parsed change event.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A record was inserted.
    Created {
        /// Table of the record.
        table: Table,
        /// Record id.
        key: RecordId,
        /// The full new record.
        record: Value,
    },
    /// A record was modified; only the diff is known.
    Updated {
        /// Table of the record.
        table: Table,
        /// Record id.
        key: RecordId,
        /// Key path -> new value.
        mods: Map<String, Value>,
        /// Record before the change, if the engine sent it.
        old_record: Option<Value>,
    },
    /// A record was removed.
    Deleted {
        /// Table of the record.
        table: Table,
        /// Record id.
        key: RecordId,
        /// The removed record.
        old_record: Value,
    },
}

impl ChangeEvent {
    /// Table the event belongs to.
    pub fn table(&self) -> Table {
        match self {
            ChangeEvent::Created { table, .. }
            | ChangeEvent::Updated { table, .. }
            | ChangeEvent::Deleted { table, .. } => *table,
        }
    }

    /// Id of the affected record.
    pub fn key(&self) -> RecordId {
        match self {
            ChangeEvent::Created { key, .. }
            | ChangeEvent::Updated { key, .. }
            | ChangeEvent::Deleted { key, .. } => *key,
        }
    }
}

/// All changes committed by one write transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Session that committed the transaction.
    pub origin: String,
    /// Changes in commit order.
    pub changes: Vec<RawChange>,
}

impl ChangeBatch {
    /// Creates a batch.
    pub fn new(origin: impl Into<String>, changes: Vec<RawChange>) -> Self {
        Self {
            origin: origin.into(),
            changes,
        }
    }
}

/// Top-level field diff between two versions of a record, in the `mods`
/// shape of an Updated change.
pub fn diff_fields(old: &Value, new: &Value) -> Map<String, Value> {
    let mut mods = Map::new();
    let (Value::Object(old), Value::Object(new)) = (old, new) else {
        return mods;
    };
    for (field, value) in new {
        if old.get(field) != Some(value) {
            mods.insert(field.clone(), value.clone());
        }
    }
    for field in old.keys() {
        if !new.contains_key(field) {
            mods.insert(field.clone(), Value::Null);
        }
    }
    mods
}

/// Applies `mods` (dot-separated key paths) onto `target`.
///
/// Numeric segments index into arrays; writing past the end of an array pads
/// it with nulls. Missing intermediate objects are created.
pub fn apply_mods(target: &mut Value, mods: &Map<String, Value>) {
    for (path, value) in mods {
        let segments: Vec<&str> = path.split('.').collect();
        set_path(target, &segments, value.clone());
    }
}

fn set_path(target: &mut Value, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *target = value;
        return;
    };

    if let Value::Array(items) = target {
        if let Ok(index) = head.parse::<usize>() {
            if items.len() <= index {
                items.resize(index + 1, Value::Null);
            }
            set_path(&mut items[index], rest, value);
            return;
        }
    }

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        let slot = map.entry(head.to_string()).or_insert(Value::Null);
        set_path(slot, rest, value);
    }
}

/// Fan-out of committed change batches to subscribers.
///
/// Each subscriber gets a bounded queue. A subscriber whose queue is full is
/// dropped instead of blocking the writer; its receiver then reports
/// disconnection once drained.
pub(crate) struct ChangeHub {
    subscribers: Mutex<Vec<Sender<Arc<ChangeBatch>>>>,
    capacity: usize,
}

impl ChangeHub {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn subscribe(&self) -> Receiver<Arc<ChangeBatch>> {
        let (tx, rx) = crossbeam_channel::bounded(self.capacity);
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.push(tx);
        rx
    }

    pub(crate) fn publish(&self, batch: ChangeBatch) {
        if batch.changes.is_empty() {
            return;
        }
        let batch = Arc::new(batch);
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| match tx.try_send(batch.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    capacity = self.capacity,
                    origin = %batch.origin,
                    "Dropping lagging change subscriber"
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Removing closed change subscriber");
                false
            }
        });
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
