use anyhow::{bail, Context, Result};
use outline_core::{Config, Database};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Manages an isolated store directory with tempfile
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    /// Create an empty workspace
    pub fn empty() -> Result<Self> {
        let dir = TempDir::new().context("Failed to create temp directory")?;
        Ok(Self { dir })
    }

    /// Get workspace path
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Open (or create) the database inside the workspace
    pub fn open_database(&self, config: Config) -> Result<Arc<Database>> {
        let path = self.path().join(&config.storage.file_name);
        Database::open(&path, config)
            .with_context(|| format!("Failed to open database at {}", path.display()))
    }

    /// Read an outline fixture from `fixtures/<name>.outline`
    pub fn read_fixture(name: &str) -> Result<String> {
        let fixture_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("fixtures")
            .join(format!("{}.outline", name));

        if !fixture_path.exists() {
            bail!("Fixture not found: {}", fixture_path.display());
        }

        fs::read_to_string(&fixture_path)
            .with_context(|| format!("Failed to read fixture: {}", fixture_path.display()))
    }
}

/// Parses an indented outline (two spaces per level, optional "- " bullet)
/// into `(parent values, value)` pairs in document order.
pub fn parse_outline(text: &str) -> Result<Vec<(Vec<String>, String)>> {
    let mut entries = Vec::new();
    let mut stack: Vec<String> = Vec::new();

    for (number, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let indent = line.len() - line.trim_start_matches(' ').len();
        if indent % 2 != 0 {
            bail!("line {}: odd indentation", number + 1);
        }
        let depth = indent / 2;
        if depth > stack.len() {
            bail!("line {}: indented past its parent", number + 1);
        }

        let trimmed = line.trim();
        let value = trimmed.strip_prefix("- ").unwrap_or(trimmed).to_string();

        stack.truncate(depth);
        entries.push((stack.clone(), value.clone()));
        stack.push(value);
    }

    Ok(entries)
}
