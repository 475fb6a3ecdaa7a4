//! Show the helper row.

use super::{format_millis, open_store};
use anyhow::Result;
use console::style;
use outline_core::decode_path;

pub fn run() -> Result<()> {
    let store = open_store()?;
    let helper = store.get_helpers()?;

    println!("{}", style("Helpers:").bold());
    println!("  Schema version: {}", style(helper.schema_version).cyan());
    println!("  Last updated:   {}", format_millis(helper.last_updated));
    match helper.encoded_cursor() {
        Some(cursor) => println!("  Cursor:         {}", cursor),
        None => println!("  Cursor:         {}", style("(none)").dim()),
    }

    println!("  Recently edited: {}", helper.recently_edited.len());
    let mut recent: Vec<_> = helper.recently_edited.iter().collect();
    recent.sort_by(|a, b| b.1.cmp(a.1));
    for (encoded, ts) in recent.into_iter().take(10) {
        let values = decode_path(encoded)
            .ok()
            .and_then(|path| store.get_thoughts_by_ids(&path).ok())
            .map(|thoughts| {
                thoughts
                    .into_iter()
                    .map(|t| t.map_or_else(|| "?".to_string(), |t| t.value))
                    .collect::<Vec<_>>()
                    .join(" / ")
            })
            .unwrap_or_else(|| encoded.clone());
        println!("    {}  {}", style(format_millis(*ts)).dim(), values);
    }
    Ok(())
}
