//! CLI commands.

pub mod add;
pub mod clear;
pub mod cursor;
pub mod helpers;
pub mod import;
pub mod init;
pub mod logs;
pub mod rebuild;
pub mod search;
pub mod show;
pub mod watch;

use anyhow::{bail, Context as _, Result};
use chrono::{DateTime, Local};
use outline_core::{Context, Database, RecordId, Store, Thought, ThoughtPath};
use std::path::Path;

/// Store directory, relative to the working directory.
pub const STORE_DIR: &str = ".outline";

/// Opens the store in the current directory.
pub fn open_store() -> Result<Store> {
    if !Path::new(STORE_DIR).is_dir() {
        bail!("Not an outline store (no {} directory found). Run 'outline init'.", STORE_DIR);
    }
    let db = Database::open_dir(STORE_DIR).context("Failed to open outline store")?;
    let store = db.connect();
    tracing::debug!(path = %db.path().display(), session = store.session().id(), "Opened store");
    Ok(store)
}

/// Resolves thought values to their ids.
pub fn path_of(segments: &[String]) -> ThoughtPath {
    segments.iter().map(|s| RecordId::hash_text(s)).collect()
}

/// Links `value` as a child of the context at `parent`, creating the thought
/// and the context as needed. Appends at the end when the child is new; an
/// existing child keeps its rank.
pub fn link(store: &Store, parent: &[RecordId], value: &str) -> Result<Thought> {
    let context_id = RecordId::hash_path(parent);
    let mut context = store
        .get_context_by_id(&context_id)?
        .unwrap_or_else(|| Context::new(parent.to_vec()));

    let child_id = RecordId::hash_text(value);
    if !context.children.iter().any(|c| c.key == child_id) {
        let rank = context.next_rank();
        context.upsert_child(child_id, rank);
    }

    let mut thought = store
        .get_thought_by_id(&child_id)?
        .unwrap_or_else(|| Thought::new(value, Vec::new()));
    thought.add_context(context_id);

    let thought = store
        .update_thought(child_id, thought)
        .with_context(|| format!("Failed to store thought '{}'", value))?;
    store
        .update_context(context_id, context)
        .context("Failed to store context")?;
    Ok(thought)
}

/// Links every segment below its predecessors, so the whole path exists.
/// Returns the last thought.
pub fn link_path(store: &Store, segments: &[String]) -> Result<Thought> {
    let mut parent = Vec::with_capacity(segments.len());
    let mut last = None;
    for segment in segments {
        let thought = link(store, &parent, segment)?;
        parent.push(thought.id);
        last = Some(thought);
    }
    last.context("Empty path")
}

/// Formats a millisecond timestamp in local time.
pub fn format_millis(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}
