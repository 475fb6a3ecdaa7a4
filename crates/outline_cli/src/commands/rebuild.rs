//! Rebuild command implementation.

use super::open_store;
use anyhow::{Context, Result};
use console::style;
use std::time::Instant;

/// Rebuild the word index from stored thoughts.
pub fn run() -> Result<()> {
    let start = Instant::now();

    let store = open_store()?;

    println!("Rebuilding word index...");

    let report = store
        .rebuild_word_index()
        .context("Failed to rebuild word index")?;

    let elapsed = start.elapsed();
    println!(
        "Indexed {} thoughts ({} words) in {:.2}s",
        style(report.thoughts_indexed).cyan(),
        style(report.words_indexed).cyan(),
        elapsed.as_secs_f64()
    );

    if !report.corrupted_thoughts.is_empty() {
        println!(
            "{} {} thought(s) could not be decoded and were skipped:",
            style("⚠").yellow(),
            report.corrupted_thoughts.len()
        );
        for id in &report.corrupted_thoughts {
            println!("    {} {}", style("×").red(), id.as_hex());
        }
    }

    store.log(
        &format!(
            "rebuilt word index: {} thoughts, {} skipped",
            report.thoughts_indexed,
            report.corrupted_thoughts.len()
        ),
        None,
    )?;
    Ok(())
}
