//! Full-text search command.

use super::open_store;
use anyhow::{Context, Result};
use console::style;

/// Print every thought matching `query`.
pub fn run(query: &str) -> Result<()> {
    let store = open_store()?;
    let results = store
        .full_text_search(query)
        .context("Search failed")?;

    if results.is_empty() {
        println!("No thoughts match '{}'", query);
        return Ok(());
    }

    for thought in &results {
        println!(
            "{}  {}",
            style(&thought.id.as_hex()[..12]).dim(),
            thought.value
        );
    }
    println!();
    println!("{} result(s)", style(results.len()).cyan());
    Ok(())
}
