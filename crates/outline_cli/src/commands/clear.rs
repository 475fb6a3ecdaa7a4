//! Clear the store.

use super::open_store;
use anyhow::Result;
use console::style;
use std::io::{self, Write};

/// Delete all thoughts, contexts and helper fields. Logs are kept.
pub fn run(yes: bool) -> Result<()> {
    let store = open_store()?;

    if !yes {
        println!();
        println!(
            "{} {}",
            style("⚠").yellow().bold(),
            style("WARNING:").yellow().bold()
        );
        println!("  This permanently deletes every thought, context and the cursor.");
        println!();
        print!("Continue? [y/N]: ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("{} Clear cancelled.", style("✓").green());
            return Ok(());
        }
    }

    let thoughts = store.get_thought_index()?.len();
    store.clear_all()?;
    store.log(&format!("cleared {} thoughts", thoughts), None)?;

    println!("{} Cleared {} thoughts", style("✓").green(), thoughts);
    Ok(())
}
