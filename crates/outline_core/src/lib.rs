//! Outline Core Library
//!
//! Local-first persistence and synchronization for a thought graph:
//! - Content-addressed thoughts and contexts
//! - A word index kept atomically in step with every thought write
//! - Prefix full-text search
//! - A singleton helper row for cursor and editing metadata
//! - Change subscriptions normalized per session, with echo and staleness
//!   filtering across tabs sharing one database
//!
//! # Quick Start
//!
//! ```
//! use outline_core::{Config, Database, RecordId, Thought};
//! use tempfile::TempDir;
//!
//! let tmp = TempDir::new().unwrap();
//! let db = Database::open(tmp.path().join("outline.redb"), Config::default()).unwrap();
//! let store = db.connect();
//!
//! let thought = Thought::new("hello world", vec![RecordId::root()]);
//! store.update_thought(thought.id, thought.clone()).unwrap();
//!
//! let hits = store.full_text_search("hel").unwrap();
//! assert_eq!(hits[0].value, "hello world");
//! ```
//!
//! # Multi-parent linking
//!
//! A thought's id is the hash of its normalized text, so the same text under
//! two parents is one record listing both contexts:
//!
//! ```
//! use outline_core::{RecordId, Thought};
//!
//! let a = RecordId::hash_path(&[RecordId::hash_text("fruit")]);
//! let b = RecordId::hash_path(&[RecordId::hash_text("red things")]);
//!
//! let mut apple = Thought::new("Apple", vec![a]);
//! apple.add_context(b);
//! assert_eq!(apple.id, RecordId::hash_text("apple"));
//! assert_eq!(apple.contexts, vec![a, b]);
//! ```
//!
//! # Following other tabs
//!
//! ```
//! use outline_core::{Config, Database, MirrorState, RecordId, Thought};
//! use tempfile::TempDir;
//!
//! let tmp = TempDir::new().unwrap();
//! let db = Database::open(tmp.path().join("outline.redb"), Config::default()).unwrap();
//! let tab_a = db.connect();
//! let tab_b = db.connect();
//!
//! let feed = tab_b.changes();
//! let mirror = MirrorState::new();
//!
//! let thought = Thought::new("from tab a", vec![RecordId::root()]);
//! tab_a.update_thought(thought.id, thought.clone()).unwrap();
//!
//! feed.process_pending(&mirror);
//! assert!(mirror.thought(&thought.id).is_some());
//! ```

mod changes;
mod config;
mod database;
mod error;
mod helpers;
mod record_id;
mod search;
mod session;
mod store;
mod subscription;
mod types;
mod word_index;

pub use changes::{apply_mods, diff_fields, ChangeBatch, ChangeEvent, ChangeType, RawChange};
pub use config::{Config, SearchConfig, StorageConfig, SubscriptionConfig};
pub use database::{Database, STORE_SCHEMA_VERSION};
pub use error::{KeyFailure, Result, StoreError};
pub use record_id::{normalize_text, RecordId};
pub use session::{Origin, Session};
pub use store::Store;
pub use subscription::{
    FeedStatus, IndexUpdates, LocalState, MirrorState, Subscription, UpdateSink,
};
pub use types::*;
pub use word_index::{tokenize, RebuildReport};

/// Time provider trait for testing.
///
/// Allows injecting controlled time into sessions so write stamps are
/// predictable. Only used when explicitly set via `with_time_provider()`.
pub trait TimeProvider: Send + Sync {
    /// Returns the current Unix timestamp in milliseconds.
    fn now(&self) -> i64;
}

impl<F> TimeProvider for F
where
    F: Fn() -> i64 + Send + Sync,
{
    fn now(&self) -> i64 {
        self()
    }
}
