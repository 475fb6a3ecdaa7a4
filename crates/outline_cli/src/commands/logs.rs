//! Show diagnostic logs.

use super::{format_millis, open_store};
use anyhow::Result;
use console::style;

pub fn run(limit: Option<usize>) -> Result<()> {
    let store = open_store()?;
    let logs = store.get_logs()?;
    let skip = limit.map_or(0, |n| logs.len().saturating_sub(n));

    if logs.is_empty() {
        println!("No log entries");
        return Ok(());
    }

    for entry in logs.iter().skip(skip) {
        println!(
            "{} {}  {}",
            style(format!("#{:<4}", entry.id)).dim(),
            format_millis(entry.created),
            entry.message
        );
        if let Some(stack) = &entry.stack {
            for line in stack.lines() {
                println!("        {}", style(line).dim());
            }
        }
    }
    Ok(())
}
