//! Derived word index over thought values.
//!
//! Two tables are kept in lockstep with `thoughtIndex`:
//! - `thoughtWordsIndex`: thought id -> its token list
//! - `wordPostings`: token -> set of thought ids (what prefix search scans)
//!
//! Maintenance runs inside the write transaction of the thought mutation that
//! triggered it, so a committed thought is never visible with stale words.

use crate::database::{
    decode, encode, Record, THOUGHTS_TABLE, THOUGHT_WORDS_TABLE, WORD_POSTINGS_TABLE,
};
use crate::error::{storage, Result};
use crate::store::Store;
use crate::types::Thought;
use crate::RecordId;
use redb::{ReadableTable, ReadableTableMetadata, WriteTransaction};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Report from a word index rebuild.
#[derive(Debug, Clone, Default)]
pub struct RebuildReport {
    /// Number of thoughts indexed.
    pub thoughts_indexed: usize,
    /// Number of distinct words in the rebuilt postings.
    pub words_indexed: usize,
    /// Thought ids skipped because their record could not be decoded.
    pub corrupted_thoughts: Vec<RecordId>,
}

/// Splits a value into lower-cased, whitespace-separated, deduplicated tokens
/// in order of first occurrence.
///
/// ```
/// use outline_core::tokenize;
///
/// assert_eq!(tokenize("Hello hello  World"), vec!["hello", "world"]);
/// assert!(tokenize("   ").is_empty());
/// ```
pub fn tokenize(value: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    value
        .split_whitespace()
        .map(str::to_lowercase)
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Keeps the index entry for `thought` current. No-op when the value did not
/// change.
pub(crate) fn index_thought(
    txn: &WriteTransaction,
    thought: &Thought,
    previous: Option<&Thought>,
) -> Result<()> {
    if previous.is_some_and(|prev| prev.value == thought.value) {
        return Ok(());
    }
    replace_words(txn, &thought.id, Some(tokenize(&thought.value)))
}

/// Removes the index entry for a deleted thought. Absent entries are fine.
pub(crate) fn remove_thought(txn: &WriteTransaction, id: &RecordId) -> Result<()> {
    replace_words(txn, id, None)
}

fn replace_words(txn: &WriteTransaction, id: &RecordId, words: Option<Vec<String>>) -> Result<()> {
    let mut words_table = txn
        .open_table(THOUGHT_WORDS_TABLE)
        .map_err(storage("Failed to open words table"))?;

    let old: Vec<String> = match words_table
        .get(id.as_bytes())
        .map_err(storage("Failed to read words entry"))?
    {
        Some(guard) => decode(guard.value())?,
        None => Vec::new(),
    };

    match &words {
        Some(words) => {
            let bytes = encode(words)?;
            words_table
                .insert(id.as_bytes(), bytes.as_slice())
                .map_err(storage("Failed to write words entry"))?;
        }
        None => {
            words_table
                .remove(id.as_bytes())
                .map_err(storage("Failed to remove words entry"))?;
        }
    }

    let new = words.unwrap_or_default();
    let mut postings = txn
        .open_table(WORD_POSTINGS_TABLE)
        .map_err(storage("Failed to open postings table"))?;

    for word in old.iter().filter(|w| !new.contains(w)) {
        let mut ids = read_posting(&postings, word)?;
        ids.remove(id);
        if ids.is_empty() {
            postings
                .remove(word.as_str())
                .map_err(storage("Failed to remove posting"))?;
        } else {
            let bytes = encode(&ids)?;
            postings
                .insert(word.as_str(), bytes.as_slice())
                .map_err(storage("Failed to write posting"))?;
        }
    }

    for word in new.iter().filter(|w| !old.contains(w)) {
        let mut ids = read_posting(&postings, word)?;
        ids.insert(*id);
        let bytes = encode(&ids)?;
        postings
            .insert(word.as_str(), bytes.as_slice())
            .map_err(storage("Failed to write posting"))?;
    }

    debug!(id = %id, words = new.len(), "Updated word index entry");
    Ok(())
}

pub(crate) fn read_posting(
    postings: &impl ReadableTable<&'static str, &'static [u8]>,
    word: &str,
) -> Result<BTreeSet<RecordId>> {
    match postings
        .get(word)
        .map_err(storage("Failed to read posting"))?
    {
        Some(guard) => decode(guard.value()),
        None => Ok(BTreeSet::new()),
    }
}

impl Store {
    /// Returns the indexed words of a thought, if it has an index entry.
    pub fn get_words(&self, id: &RecordId) -> Result<Option<Vec<String>>> {
        let read_txn = self.database().begin_read()?;
        let table = read_txn
            .open_table(THOUGHT_WORDS_TABLE)
            .map_err(storage("Failed to open words table"))?;
        let entry = table
            .get(id.as_bytes())
            .map_err(storage("Failed to read words entry"))?;
        match entry {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Drops and regenerates the word index from the thought table.
    ///
    /// Thoughts that fail to decode are skipped and reported rather than
    /// aborting the rebuild.
    pub fn rebuild_word_index(&self) -> Result<RebuildReport> {
        let write_txn = self.database().begin_write()?;
        let mut report = RebuildReport::default();

        let mut thoughts = Vec::new();
        {
            let table = write_txn
                .open_table(THOUGHTS_TABLE)
                .map_err(storage("Failed to open thought table"))?;
            for entry in table.iter().map_err(storage("Failed to iterate thoughts"))? {
                let (key, value) = entry.map_err(storage("Failed to read thought"))?;
                let id = RecordId::from_bytes(*key.value());
                match decode::<Thought>(value.value()) {
                    Ok(thought) => thoughts.push((id, thought)),
                    Err(e) => {
                        warn!(id = %id, error = %e, "Skipping corrupted thought during rebuild");
                        report.corrupted_thoughts.push(id);
                    }
                }
            }
        }

        write_txn
            .delete_table(THOUGHT_WORDS_TABLE)
            .map_err(storage("Failed to drop words table"))?;
        write_txn
            .delete_table(WORD_POSTINGS_TABLE)
            .map_err(storage("Failed to drop postings table"))?;

        for (id, mut thought) in thoughts {
            thought.id = id;
            <Thought as Record>::after_write(&write_txn, &thought, None)?;
            report.thoughts_indexed += 1;
        }

        {
            let postings = write_txn
                .open_table(WORD_POSTINGS_TABLE)
                .map_err(storage("Failed to open postings table"))?;
            report.words_indexed = postings.len().map_err(storage("Failed to count postings"))? as usize;
        }
        // Recreate the words table even when no thought exists.
        write_txn
            .open_table(THOUGHT_WORDS_TABLE)
            .map_err(storage("Failed to open words table"))?;

        write_txn.commit().map_err(storage("Failed to commit"))?;

        info!(
            thoughts = report.thoughts_indexed,
            words = report.words_indexed,
            corrupted = report.corrupted_thoughts.len(),
            "Rebuilt word index"
        );
        Ok(report)
    }
}
