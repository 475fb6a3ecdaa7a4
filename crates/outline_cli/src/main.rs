//! Outline CLI - Command-line interface for an outline thought store.

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use outline_core::StoreError;
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "outline")]
#[command(about = "Local-first outline storage", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new outline store
    Init,
    /// Add a thought under a path of ancestor thoughts
    Add {
        /// Ancestor thoughts from the root, then the new thought
        #[arg(required = true, num_args = 1..)]
        segments: Vec<String>,
    },
    /// Import an indented outline (two spaces per level)
    Import {
        /// Outline file
        file: PathBuf,
    },
    /// Full-text search (every word must prefix-match)
    Search {
        /// Query text
        query: String,
    },
    /// Print the outline below a path
    Show {
        /// Ancestor thoughts from the root (empty for the whole outline)
        segments: Vec<String>,
        /// Maximum depth to print
        #[arg(short, long)]
        depth: Option<usize>,
    },
    /// Manage the cursor
    Cursor {
        #[command(subcommand)]
        command: CursorCommands,
    },
    /// Show the helper row
    Helpers,
    /// Show diagnostic logs
    Logs {
        /// Maximum number of entries to show (newest)
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Normalize relayed change batches (JSON lines on stdin) and print the updates
    Watch,
    /// Rebuild the word index from stored thoughts
    Rebuild,
    /// Delete every thought, context and helper field
    Clear {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum CursorCommands {
    /// Move the cursor to a path
    Set {
        /// Thoughts from the root to the cursor
        #[arg(required = true, num_args = 1..)]
        segments: Vec<String>,
    },
    /// Clear the cursor
    Clear,
}

fn main() -> Result<()> {
    // Initialize tracing subscriber
    // Respects RUST_LOG environment variable (e.g., RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init => commands::init::run(),
        Commands::Add { segments } => commands::add::run(&segments),
        Commands::Import { file } => commands::import::run(&file),
        Commands::Search { query } => commands::search::run(&query),
        Commands::Show { segments, depth } => commands::show::run(&segments, depth),
        Commands::Cursor { command } => match command {
            CursorCommands::Set { segments } => commands::cursor::set(&segments),
            CursorCommands::Clear => commands::cursor::clear(),
        },
        Commands::Helpers => commands::helpers::run(),
        Commands::Logs { limit } => commands::logs::run(limit),
        Commands::Watch => commands::watch::run(),
        Commands::Rebuild => commands::rebuild::run(),
        Commands::Clear { yes } => commands::clear::run(yes),
    };

    if let Err(err) = &result {
        if let Some(hint) = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<StoreError>())
            .and_then(StoreError::recovery_suggestion)
        {
            eprintln!("{} {}", style("hint:").cyan().bold(), hint);
        }
    }
    result
}
