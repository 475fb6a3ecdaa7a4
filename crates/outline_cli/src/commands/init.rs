//! Initialize a new outline store.

use super::STORE_DIR;
use anyhow::{Context, Result};
use outline_core::{Config, Database};
use std::path::Path;

/// Initialize an outline store in the current directory.
pub fn run() -> Result<()> {
    let dir = Path::new(STORE_DIR);
    let fresh = !dir.join("config.toml").exists();

    std::fs::create_dir_all(dir).context("Failed to create store directory")?;
    if fresh {
        Config::default()
            .save(dir)
            .context("Failed to write configuration")?;
    }

    let db = Database::open_dir(dir).context("Failed to open outline store")?;
    let store = db.connect();
    let helper = store.get_helpers().context("Failed to initialize helpers")?;
    store.log("store initialized", None)?;

    if fresh {
        println!("Initialized outline store in {}/", STORE_DIR);
    } else {
        println!("Reinitialized existing outline store in {}/", STORE_DIR);
    }
    println!();
    println!("  Database:       {}", db.path().display());
    println!("  Configuration:  {}/config.toml", STORE_DIR);
    println!("  Schema version: {}", helper.schema_version);
    println!("  Session:        {}", store.session().id());

    Ok(())
}
