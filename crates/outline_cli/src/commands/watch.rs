//! Normalize relayed change batches and print the resulting updates.
//!
//! Each stdin line is one JSON `ChangeBatch` captured from another process's
//! change feed. Batches are relayed into this store's feed and normalized
//! against an in-memory mirror loaded from the store, exactly as a
//! subscribed application would see them.

use super::open_store;
use anyhow::{Context, Result};
use console::style;
use outline_core::{
    ChangeBatch, FeedStatus, IndexUpdates, LocalState, MirrorState, RecordId, Table, Timestamp,
    UpdateSink,
};
use std::io::{self, BufRead};

/// Prints every update before applying it to the mirror.
struct PrintingSink {
    mirror: MirrorState,
}

impl LocalState for PrintingSink {
    fn known_last_updated(&self, table: Table, key: &RecordId) -> Option<Timestamp> {
        self.mirror.known_last_updated(table, key)
    }

    fn known_keys(&self, table: Table) -> Vec<RecordId> {
        self.mirror.known_keys(table)
    }
}

impl UpdateSink for PrintingSink {
    fn apply_updates(&self, updates: IndexUpdates) {
        println!("{} {} update(s)", style("batch").cyan().bold(), updates.len());
        for (id, update) in &updates.thought_index_updates {
            match update {
                Some(thought) => println!(
                    "  {} thought {}  {:?} by {}",
                    style("put").green(),
                    &id.as_hex()[..12],
                    thought.value,
                    thought.updated_by
                ),
                None => println!("  {} thought {}", style("del").red(), &id.as_hex()[..12]),
            }
        }
        for (id, update) in &updates.context_index_updates {
            match update {
                Some(context) => println!(
                    "  {} context {}  {} child(ren) by {}",
                    style("put").green(),
                    &id.as_hex()[..12],
                    context.children.len(),
                    context.updated_by
                ),
                None => println!("  {} context {}", style("del").red(), &id.as_hex()[..12]),
            }
        }
        self.mirror.apply_updates(updates);
    }
}

pub fn run() -> Result<()> {
    let store = open_store()?;
    let sink = PrintingSink {
        mirror: MirrorState::load(&store).context("Failed to load store contents")?,
    };
    let feed = store.changes();

    let mut received = 0usize;
    for (number, line) in io::stdin().lock().lines().enumerate() {
        let line = line.context("Failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        let batch: ChangeBatch = match serde_json::from_str(&line) {
            Ok(batch) => batch,
            Err(e) => {
                eprintln!(
                    "{} line {}: not a change batch: {}",
                    style("skip").yellow(),
                    number + 1,
                    e
                );
                continue;
            }
        };
        store.database().relay(batch);
        received += 1;
        if let (_, FeedStatus::Closed) = feed.process_pending(&sink) {
            tracing::warn!(line = number + 1, "Change feed closed; stopping");
            break;
        }
    }

    println!();
    println!(
        "{} batch(es) relayed, {} produced updates",
        received,
        sink.mirror.batches_applied()
    );
    Ok(())
}
