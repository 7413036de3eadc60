//! `graphflow` - validate and run workflow graphs from the command line
//!
//! Logging goes to stderr and is filtered by `RUST_LOG`; stream responses go to stdout, one
//! JSON object per line.

use anyhow::Result;
use clap::{Parser, Subcommand};
use graphflow_cli::RunOptions;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "graphflow")]
#[command(about = "Run workflow graphs with the graphflow engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a graph definition
    Validate {
        /// Path to a JSON or YAML graph
        graph: PathBuf,
    },

    /// Run a graph from its start node
    Run {
        /// Path to a JSON or YAML graph
        graph: PathBuf,

        /// User inputs as a JSON object
        #[arg(short, long)]
        inputs: Option<String>,

        /// Engine limits (YAML or TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the final runtime-state snapshot into this directory
        #[arg(long)]
        snapshot_dir: Option<PathBuf>,
    },

    /// Continue a run from a snapshot file
    Resume {
        /// Path to a JSON or YAML graph
        graph: PathBuf,

        /// Snapshot written by an earlier run
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Values to add before resuming, keyed by dotted selector
        #[arg(short, long)]
        inputs: Option<String>,

        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        snapshot_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut stdout = std::io::stdout().lock();

    match cli.command {
        Commands::Validate { graph } => {
            let summary = graphflow_cli::validate(&graph)?;
            println!(
                "{} is valid: {} nodes, {} edges, root '{}'",
                graph.display(),
                summary.nodes,
                summary.edges,
                summary.root_node_id
            );
        }
        Commands::Run {
            graph,
            inputs,
            config,
            snapshot_dir,
        } => {
            let options = RunOptions {
                graph,
                inputs,
                config,
                snapshot_dir,
            };
            let summary = graphflow_cli::run(&options, &mut stdout).await?;
            report(&summary);
        }
        Commands::Resume {
            graph,
            snapshot,
            inputs,
            config,
            snapshot_dir,
        } => {
            let options = RunOptions {
                graph,
                inputs,
                config,
                snapshot_dir,
            };
            let summary = graphflow_cli::resume(&options, &snapshot, &mut stdout).await?;
            report(&summary);
        }
    }

    Ok(())
}

fn report(summary: &graphflow_cli::RunSummary) {
    tracing::info!(run_id = %summary.run_id, status = %summary.status, "Run finished");
    if let Some(path) = &summary.snapshot_path {
        eprintln!("snapshot: {}", path.display());
    }
}
