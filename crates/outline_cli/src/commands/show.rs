//! Print the outline below a path.

use super::{open_store, path_of};
use anyhow::Result;
use console::style;
use outline_core::{RecordId, Store, ThoughtPath};

/// Print the subtree rooted at `segments`.
pub fn run(segments: &[String], depth: Option<usize>) -> Result<()> {
    let store = open_store()?;
    let path = path_of(segments);

    if !segments.is_empty() {
        println!("{}", style(segments.join(" / ")).bold());
    }

    let printed = print_children(&store, path, 0, depth)?;
    if printed == 0 {
        println!("{}", style("(empty)").dim());
    }
    Ok(())
}

fn print_children(
    store: &Store,
    path: ThoughtPath,
    level: usize,
    max_depth: Option<usize>,
) -> Result<usize> {
    if max_depth.is_some_and(|max| level >= max) {
        return Ok(0);
    }

    let context_id = RecordId::hash_path(&path);
    let mut printed = 0;
    for child in store.children_of(&context_id)? {
        let label = if child.value.is_empty() {
            style(format!("<missing {}>", &child.id.as_hex()[..12])).red().to_string()
        } else {
            child.value.clone()
        };
        let shared = if child.contexts.len() > 1 {
            style(format!(" (+{})", child.contexts.len() - 1)).dim().to_string()
        } else {
            String::new()
        };
        println!("{}- {}{}", "  ".repeat(level), label, shared);
        printed += 1;

        let mut child_path = path.clone();
        child_path.push(child.id);
        printed += print_children(store, child_path, level + 1, max_depth)?;
    }
    Ok(printed)
}
