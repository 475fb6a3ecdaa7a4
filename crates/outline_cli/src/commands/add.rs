//! Add a thought at a path.

use super::{link_path, open_store, path_of};
use anyhow::Result;
use console::style;
use outline_core::encode_path;

/// Add the last segment below the preceding ones, creating missing ancestors.
pub fn run(segments: &[String]) -> Result<()> {
    let store = open_store()?;
    let thought = link_path(&store, segments)?;

    let path = path_of(segments);
    let mut recently_edited = store.get_helpers()?.recently_edited;
    recently_edited.insert(encode_path(&path), thought.last_updated);
    store.update_recently_edited(recently_edited)?;

    println!(
        "{} {} ({} context{})",
        style("Added").green(),
        style(&thought.value).bold(),
        thought.contexts.len(),
        if thought.contexts.len() == 1 { "" } else { "s" }
    );
    println!("  id: {}", thought.id);
    Ok(())
}
