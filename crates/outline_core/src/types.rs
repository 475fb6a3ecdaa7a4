//! Core data types for the thought graph.

use crate::error::{Result, StoreError};
use crate::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// An ordered root-to-node sequence of thought ids.
pub type ThoughtPath = Vec<RecordId>;

/// Fixed key of the singleton helper row.
pub const HELPER_ID: &str = "EM";

/// The tables of the on-device database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    /// Thoughts keyed by text hash.
    ThoughtIndex,
    /// Contexts keyed by path hash.
    ContextIndex,
    /// Derived id -> words index.
    ThoughtWordsIndex,
    /// Singleton metadata row.
    Helpers,
    /// Append-only diagnostics.
    Logs,
}

impl Table {
    /// Name used on the wire and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::ThoughtIndex => "thoughtIndex",
            Table::ContextIndex => "contextIndex",
            Table::ThoughtWordsIndex => "thoughtWordsIndex",
            Table::Helpers => "helpers",
            Table::Logs => "logs",
        }
    }

    /// Resolves a wire name. Returns `None` for unknown tables.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "thoughtIndex" => Some(Table::ThoughtIndex),
            "contextIndex" => Some(Table::ContextIndex),
            "thoughtWordsIndex" => Some(Table::ThoughtWordsIndex),
            "helpers" => Some(Table::Helpers),
            "logs" => Some(Table::Logs),
            _ => None,
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unique text value and every context it appears in.
///
/// Two thoughts with the same (normalized) value always share one id; that is
/// how a thought becomes linked from several contexts at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thought {
    /// Content hash of `value` at creation.
    pub id: RecordId,
    /// The text.
    pub value: String,
    /// Every context the value currently appears under (set semantics).
    pub contexts: Vec<RecordId>,
    /// When the thought was first stored.
    pub created: Timestamp,
    /// Last write, stamped by the store.
    pub last_updated: Timestamp,
    /// Session that issued the last write, stamped by the store.
    pub updated_by: String,
}

impl Thought {
    /// Creates an unstamped thought whose id is the hash of `value`.
    pub fn new(value: impl Into<String>, contexts: Vec<RecordId>) -> Self {
        let value = value.into();
        let mut thought = Self {
            id: RecordId::hash_text(&value),
            value,
            contexts: Vec::new(),
            created: 0,
            last_updated: 0,
            updated_by: String::new(),
        };
        for context in contexts {
            thought.add_context(context);
        }
        thought
    }

    /// Adds a context if not already present.
    pub fn add_context(&mut self, context: RecordId) {
        if !self.contexts.contains(&context) {
            self.contexts.push(context);
        }
    }

    /// Removes a context. Returns true when the thought has no contexts left
    /// and should be deleted.
    pub fn remove_context(&mut self, context: &RecordId) -> bool {
        self.contexts.retain(|c| c != context);
        self.contexts.is_empty()
    }

    /// Stand-in for a thought that a context references but the thought table
    /// lacks. Never persisted.
    pub fn placeholder(id: RecordId, context: RecordId) -> Self {
        Self {
            id,
            value: String::new(),
            contexts: vec![context],
            created: 0,
            last_updated: 0,
            updated_by: String::new(),
        }
    }

    /// Decodes a thought from a loosely typed record (change-event payloads),
    /// dropping null context members.
    pub fn from_value(value: Value) -> Result<Self> {
        let raw: RawThought = serde_json::from_value(value)
            .map_err(|e| StoreError::Deserialization(format!("thought: {}", e)))?;
        let mut contexts = Vec::with_capacity(raw.contexts.len());
        for context in raw.contexts.into_iter().filter_map(relation_member::<RecordId>) {
            if !contexts.contains(&context) {
                contexts.push(context);
            }
        }
        Ok(Self {
            id: raw.id.unwrap_or_else(|| RecordId::hash_text(&raw.value)),
            value: raw.value,
            contexts,
            created: raw.created,
            last_updated: raw.last_updated,
            updated_by: raw.updated_by,
        })
    }

    /// Encodes to the loosely typed form used by change events.
    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

/// A child entry of a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Child {
    /// Id of the child thought.
    pub key: RecordId,
    /// Ordering key within the context; not necessarily contiguous.
    pub rank: f64,
}

/// An ancestor path and its direct children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    /// Hash of `context`.
    pub id: RecordId,
    /// Root-to-parent path of thought ids.
    pub context: ThoughtPath,
    /// Children of the last thought on the path.
    pub children: Vec<Child>,
    /// Last write, stamped by the store.
    pub last_updated: Timestamp,
    /// Session that issued the last write, stamped by the store.
    pub updated_by: String,
}

impl Context {
    /// Creates an empty, unstamped context for `path`.
    pub fn new(path: ThoughtPath) -> Self {
        Self {
            id: RecordId::hash_path(&path),
            context: path,
            children: Vec::new(),
            last_updated: 0,
            updated_by: String::new(),
        }
    }

    /// The root context is never deleted, even when it has no children.
    pub fn is_root(&self) -> bool {
        self.context.is_empty()
    }

    /// Inserts a child, or moves it to `rank` if already present.
    pub fn upsert_child(&mut self, key: RecordId, rank: f64) {
        match self.children.iter_mut().find(|c| c.key == key) {
            Some(child) => child.rank = rank,
            None => self.children.push(Child { key, rank }),
        }
    }

    /// Removes a child. Returns true when the context is empty and should be
    /// deleted.
    pub fn remove_child(&mut self, key: &RecordId) -> bool {
        self.children.retain(|c| &c.key != key);
        self.children.is_empty() && !self.is_root()
    }

    /// Rank one past the current maximum, for appending.
    pub fn next_rank(&self) -> f64 {
        self.children
            .iter()
            .map(|c| c.rank)
            .fold(None, |max: Option<f64>, r| Some(max.map_or(r, |m| m.max(r))))
            .map_or(0.0, |m| m + 1.0)
    }

    /// Children sorted by rank.
    pub fn ranked_children(&self) -> Vec<Child> {
        let mut children = self.children.clone();
        children.sort_by(|a, b| a.rank.total_cmp(&b.rank));
        children
    }

    /// Decodes a context from a loosely typed record, dropping null children.
    pub fn from_value(value: Value) -> Result<Self> {
        let raw: RawContext = serde_json::from_value(value)
            .map_err(|e| StoreError::Deserialization(format!("context: {}", e)))?;
        Ok(Self {
            id: raw.id.unwrap_or_else(|| RecordId::hash_path(&raw.context)),
            context: raw.context,
            children: raw
                .children
                .into_iter()
                .filter_map(relation_member::<Child>)
                .collect(),
            last_updated: raw.last_updated,
            updated_by: raw.updated_by,
        })
    }

    /// Encodes to the loosely typed form used by change events.
    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawThought {
    #[serde(default)]
    id: Option<RecordId>,
    value: String,
    #[serde(default)]
    contexts: Vec<Value>,
    #[serde(default)]
    created: Timestamp,
    #[serde(default)]
    last_updated: Timestamp,
    #[serde(default)]
    updated_by: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContext {
    #[serde(default)]
    id: Option<RecordId>,
    #[serde(default)]
    context: ThoughtPath,
    #[serde(default)]
    children: Vec<Value>,
    #[serde(default)]
    last_updated: Timestamp,
    #[serde(default)]
    updated_by: String,
}

/// Decodes one member of a relation array. The storage layer can leave nulls
/// (or half-written entries) behind when a member is removed; those are
/// dropped rather than failing the whole record.
fn relation_member<T: serde::de::DeserializeOwned>(value: Value) -> Option<T> {
    if value.is_null() {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(member) => Some(member),
        Err(e) => {
            warn!(error = %e, "Dropping undecodable relation member");
            None
        }
    }
}

/// The singleton metadata row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Helper {
    /// Always [`HELPER_ID`].
    pub id: String,
    /// Path of the thought under the cursor.
    pub cursor: Option<ThoughtPath>,
    /// Encoded path -> last edit time.
    pub recently_edited: BTreeMap<String, Timestamp>,
    /// Application data schema version.
    pub schema_version: u32,
    /// Application-reported last update time.
    pub last_updated: Timestamp,
}

impl Default for Helper {
    fn default() -> Self {
        Self {
            id: HELPER_ID.to_string(),
            cursor: None,
            recently_edited: BTreeMap::new(),
            schema_version: 0,
            last_updated: 0,
        }
    }
}

impl Helper {
    /// The cursor as the opaque string handed to the URL-history component.
    pub fn encoded_cursor(&self) -> Option<String> {
        self.cursor.as_deref().map(encode_path)
    }
}

/// Encodes a path as hex ids joined by `/`.
pub fn encode_path(path: &[RecordId]) -> String {
    path.iter()
        .map(RecordId::as_hex)
        .collect::<Vec<_>>()
        .join("/")
}

/// Inverse of [`encode_path`].
pub fn decode_path(encoded: &str) -> Result<ThoughtPath> {
    if encoded.is_empty() {
        return Ok(Vec::new());
    }
    encoded.split('/').map(RecordId::from_hex).collect()
}

/// A diagnostic log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Auto-incremented id.
    pub id: u64,
    /// When the entry was written.
    pub created: Timestamp,
    /// Message text.
    pub message: String,
    /// Optional stack trace or detail.
    pub stack: Option<String>,
}
