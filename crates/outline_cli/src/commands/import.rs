//! Import an indented outline.

use super::{link, open_store};
use anyhow::{bail, Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use outline_core::RecordId;
use std::path::Path;
use std::time::Instant;

const INDENT: usize = 2;

/// One outline line: nesting depth and text.
#[derive(Debug, PartialEq, Eq)]
struct Line {
    depth: usize,
    value: String,
}

fn parse(text: &str) -> Result<Vec<Line>> {
    let mut lines = Vec::new();
    let mut previous_depth = 0;

    for (number, raw) in text.lines().enumerate() {
        let value = raw.trim();
        if value.is_empty() {
            continue;
        }
        let leading = raw.len() - raw.trim_start_matches(' ').len();
        if leading % INDENT != 0 {
            bail!("line {}: indentation must be a multiple of {} spaces", number + 1, INDENT);
        }
        let depth = leading / INDENT;
        if depth > previous_depth + 1 || (lines.is_empty() && depth != 0) {
            bail!("line {}: indented more than one level below its parent", number + 1);
        }
        let value = value.trim_start_matches("- ").to_string();
        lines.push(Line { depth, value });
        previous_depth = depth;
    }
    Ok(lines)
}

/// Import every line of `file` into the store.
pub fn run(file: &Path) -> Result<()> {
    let start = Instant::now();
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let lines = parse(&text)?;

    let store = open_store()?;

    let pb = ProgressBar::new(lines.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let mut parents: Vec<RecordId> = Vec::new();
    for line in &lines {
        parents.truncate(line.depth);
        pb.set_message(line.value.clone());
        let thought = link(&store, &parents, &line.value)?;
        parents.push(thought.id);
        pb.inc(1);
    }
    pb.finish_and_clear();

    store.log(&format!("imported {} lines from {}", lines.len(), file.display()), None)?;

    println!(
        "{} Imported {} thoughts in {:.2}s",
        style("✓").green(),
        lines.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
