//! Cursor commands.

use super::{open_store, path_of};
use anyhow::Result;
use console::style;

/// Move the cursor to the thought at `segments`.
pub fn set(segments: &[String]) -> Result<()> {
    let store = open_store()?;
    let path = path_of(segments);

    let Some(last) = path.last() else {
        return clear();
    };
    if store.get_thought_by_id(last)?.is_none() {
        println!(
            "{} '{}' is not in the outline yet",
            style("⚠").yellow(),
            segments.join(" / ")
        );
    }

    let helper = store.update_cursor(Some(path))?;
    println!("Cursor: {}", segments.join(" / "));
    if let Some(encoded) = helper.encoded_cursor() {
        println!("  {}", style(encoded).dim());
    }
    Ok(())
}

/// Clear the cursor.
pub fn clear() -> Result<()> {
    let store = open_store()?;
    store.delete_cursor()?;
    println!("{} Cursor cleared", style("✓").green());
    Ok(())
}
