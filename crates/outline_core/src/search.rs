//! Full-text search over the word index.

use crate::database::{decode, get_record, THOUGHTS_TABLE, WORD_POSTINGS_TABLE};
use crate::error::{storage, Result};
use crate::store::Store;
use crate::types::Thought;
use crate::word_index::tokenize;
use crate::RecordId;
use redb::ReadableTable;
use std::collections::BTreeSet;
use tracing::{debug, warn};

impl Store {
    /// Returns the thoughts matching every token of `query`.
    ///
    /// A thought matches a token when one of its words starts with that token
    /// (case-insensitive). Tokens are combined with AND. An empty query yields
    /// an empty result. Results come back in id order, truncated to
    /// `search.max_results` when configured.
    ///
    /// The postings and the thoughts are read from one snapshot, so a result
    /// always reflects a single committed state.
    pub fn full_text_search(&self, query: &str) -> Result<Vec<Thought>> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let read_txn = self.database().begin_read()?;
        let postings = read_txn
            .open_table(WORD_POSTINGS_TABLE)
            .map_err(storage("Failed to open postings table"))?;

        let mut matched: Option<BTreeSet<RecordId>> = None;
        for token in &tokens {
            let ids = prefix_matches(&postings, token)?;
            let narrowed = match matched {
                None => ids,
                Some(acc) => acc.intersection(&ids).copied().collect(),
            };
            let done = narrowed.is_empty();
            matched = Some(narrowed);
            if done {
                break;
            }
        }
        let matched = matched.unwrap_or_default();

        let thoughts = read_txn
            .open_table(THOUGHTS_TABLE)
            .map_err(storage("Failed to open thought table"))?;
        let limit = self.database().config().search.max_results;

        let mut results = Vec::with_capacity(matched.len());
        for id in matched {
            if limit.is_some_and(|max| results.len() >= max) {
                break;
            }
            match get_record::<Thought>(&thoughts, &id)? {
                Some(thought) => results.push(thought),
                None => warn!(id = %id, "Word index references a missing thought"),
            }
        }

        debug!(query, tokens = tokens.len(), results = results.len(), "Full-text search");
        Ok(results)
    }
}

/// Collects the ids of every word that starts with `token`. Postings are
/// sorted by word, so this is a range scan that stops at the first word
/// without the prefix.
fn prefix_matches(
    postings: &impl ReadableTable<&'static str, &'static [u8]>,
    token: &str,
) -> Result<BTreeSet<RecordId>> {
    let mut ids = BTreeSet::new();
    for entry in postings
        .range(token..)
        .map_err(storage("Failed to scan postings"))?
    {
        let (word, posting) = entry.map_err(storage("Failed to read posting"))?;
        if !word.value().starts_with(token) {
            break;
        }
        let set: BTreeSet<RecordId> = decode(posting.value())?;
        ids.extend(set);
    }
    Ok(ids)
}
