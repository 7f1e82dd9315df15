//! Cairn CLI - workspace-isolated code knowledge graph from the command line.
//!
//! Register source trees as workspaces, keep their index in sync, and query
//! impact, dependency chains, cycles, and semantic matches.

use std::path::PathBuf;
use std::process::ExitCode;

use cairn::{Cairn, Config};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

mod cli;

/// Cairn: workspace-isolated code knowledge graph and semantic index.
#[derive(Parser)]
#[command(name = "cairn")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory holding the index database and config.yaml
    #[arg(long, global = true, default_value = cairn::config::DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a directory as a workspace
    Register {
        /// Workspace root directory
        path: PathBuf,

        /// Workspace name (defaults to the directory name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// List registered workspaces
    Workspaces,

    /// Bring a workspace's index up to date
    Reindex {
        /// Workspace name
        workspace: String,

        /// Remove files that no longer exist on disk
        #[arg(long)]
        remove_stale: bool,

        /// Clear the workspace's index and rebuild it from scratch
        #[arg(long)]
        rebuild: bool,
    },

    /// Show which files a reindex would touch
    Status {
        /// Workspace name
        workspace: String,
    },

    /// Show everything that depends on an entity
    Impact {
        /// Qualified or simple entity name (e.g., "`OrderService`")
        entity: String,

        /// Only analyze entities of this workspace
        #[arg(short, long)]
        workspace: Option<String>,
    },

    /// Show what an entity depends on
    Deps {
        /// Qualified or simple entity name
        entity: String,

        /// Maximum number of hops to follow
        #[arg(short, long)]
        depth: Option<u32>,

        /// Only analyze entities of this workspace
        #[arg(short, long)]
        workspace: Option<String>,
    },

    /// Detect circular dependencies between types
    Cycles {
        /// Only check this workspace
        #[arg(short, long)]
        workspace: Option<String>,
    },

    /// Find entities semantically similar to a query
    Search {
        /// Natural-language or identifier query
        query: String,

        /// Workspace to search
        #[arg(short, long)]
        workspace: String,

        /// Maximum number of results
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Drop results scoring below this similarity
        #[arg(long, default_value = "0.0")]
        min_score: f32,
    },

    /// Show index statistics for a workspace
    Stats {
        /// Workspace name
        workspace: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = Config::load_or_default(&cli.data_dir)
        .and_then(Cairn::open)
        .and_then(|cairn| run(&cairn, cli.command, cli.json));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                eprintln!("  {}: {cause}", "caused by".dimmed());
                source = std::error::Error::source(cause);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cairn: &Cairn, command: Commands, json: bool) -> Result<(), cairn::Error> {
    match command {
        Commands::Register { path, name } => {
            cli::workspaces::register(cairn, &path, name.as_deref(), json)
        }
        Commands::Workspaces => cli::workspaces::list(cairn, json),
        Commands::Reindex {
            workspace,
            remove_stale,
            rebuild,
        } => cli::reindex::run(cairn, &workspace, remove_stale, rebuild, json),
        Commands::Status { workspace } => cli::reindex::status(cairn, &workspace, json),
        Commands::Impact { entity, workspace } => {
            cli::impact::run(cairn, &entity, workspace.as_deref(), json)
        }
        Commands::Deps {
            entity,
            depth,
            workspace,
        } => cli::deps::run(cairn, &entity, depth, workspace.as_deref(), json),
        Commands::Cycles { workspace } => cli::cycles::run(cairn, workspace.as_deref(), json),
        Commands::Search {
            query,
            workspace,
            limit,
            min_score,
        } => cli::search::run(cairn, &query, &workspace, limit, min_score, json),
        Commands::Stats { workspace } => cli::stats::run(cairn, &workspace, json),
    }
}
