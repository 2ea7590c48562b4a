//! Batch driver for fisheries simulation experiments.
//!
//! Reads a batch TOML, expands its scenarios into (scenario, iteration) units and
//! runs each through operating-model simulation, index sampling and
//! estimation-model fitting.

mod cli;
mod collect;
mod config;
mod orchestrate;
mod pipeline;
mod sampler;
mod scenario;
mod summary;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use engine::exit_codes;
use engine::io::layout::RerunPolicy;

use crate::orchestrate::RunOptions;

#[derive(Parser)]
#[command(
    name = "fishsim",
    version,
    about = "Run operating/estimation model simulation batches"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every unit of a batch that has not finished yet.
    Run {
        batch: PathBuf,
        /// Rerun completed and failed units too.
        #[arg(long)]
        force: bool,
        /// Rerun failed units.
        #[arg(long)]
        retry_failed: bool,
        /// Concurrent units (defaults to `batch.jobs`).
        #[arg(long)]
        jobs: Option<usize>,
    },
    /// Create the iteration directories without running the solver.
    Prepare {
        batch: PathBuf,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        retry_failed: bool,
    },
    /// Summarize progress from the output tree.
    Status { batch: PathBuf },
    /// Export parameter estimates of completed units as JSON lines.
    Collect {
        batch: PathBuf,
        /// Output file (defaults to `<root>/results.jsonl`).
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Remove scenario output trees.
    Clean {
        batch: PathBuf,
        #[arg(long)]
        scenario: Option<String>,
    },
}

fn main() {
    engine::logging::init();
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run {
            batch,
            force,
            retry_failed,
            jobs,
        } => cli::run(
            &batch,
            RunOptions {
                policy: RerunPolicy {
                    force,
                    retry_failed,
                },
                jobs,
            },
        ),
        Command::Prepare {
            batch,
            force,
            retry_failed,
        } => cli::prepare(
            &batch,
            RerunPolicy {
                force,
                retry_failed,
            },
        ),
        Command::Status { batch } => cli::status(&batch),
        Command::Collect { batch, out } => cli::collect_results(&batch, out.as_deref()),
        Command::Clean { batch, scenario } => cli::clean(&batch, scenario.as_deref()),
    };
    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}
