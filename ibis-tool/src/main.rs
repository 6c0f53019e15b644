//! Ibis Tool - CLI for running analytic queries over a dataset
//!
//! # Modes
//!
//! - `file` - execute every query in a query file, one result line each
//! - `param` - execute a single query assembled from parameters
//!
//! # Examples
//!
//! ```bash
//! ibis-tool ./data-1k file ./queries-1k.txt
//! ibis-tool ./data-1k param 4 3 Napoleon
//! RUST_LOG=debug ibis-tool ./data-1k file ./queries-1k.txt
//! ```
//!
//! Results go to stdout; diagnostics and progress to stderr.

use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use ibis_core::{
    Engine, EngineConfig, MappedFile, QueryFileSource, QueryParamSource, QuerySource,
    SearchStrategy,
};

#[derive(Parser)]
#[command(name = "ibis-tool")]
#[command(version, about = "Social-network graph analytics over delimited dataset files")]
struct Cli {
    /// Directory containing the dataset CSV files
    data_dir: PathBuf,

    /// Worker threads (defaults to the hardware parallelism)
    #[arg(long)]
    workers: Option<usize>,

    /// Use the round-based centrality search strategy instead of
    /// dispatching all remaining seeds at once
    #[arg(long)]
    backoff: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run every query in a query file
    #[command(aliases = ["FILE", "File"])]
    File {
        /// One `query<digit>(...)` per line
        query_file: PathBuf,
    },
    /// Run a single query built from parameters
    #[command(aliases = ["PARAM", "Param"])]
    Param {
        /// Query number (1-4)
        query_number: u32,
        /// Query parameters in query order
        params: Vec<String>,
    },
}

fn main() -> Result<()> {
    // Forward the core's `log` records into tracing, everything to
    // stderr so stdout carries only results.
    tracing_log::LogTracer::init().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = EngineConfig::default();
    if let Some(workers) = cli.workers {
        config.workers = workers.max(1);
    }
    if cli.backoff {
        config.q4_strategy = SearchStrategy::ExpBackoff;
    }

    let (source, active_types): (Box<dyn QuerySource>, [bool; 4]) = match cli.mode {
        Mode::File { query_file } => {
            let file = MappedFile::open(&query_file)
                .with_context(|| format!("opening query file {}", query_file.display()))?;
            (Box::new(QueryFileSource::new(file)), [true; 4])
        }
        Mode::Param {
            query_number,
            params,
        } => {
            let source = QueryParamSource::new(query_number, &params)
                .context("assembling query from parameters")?;
            let mut active_types = [false; 4];
            active_types[(query_number - 1) as usize] = true;
            (Box::new(source), active_types)
        }
    };

    let start = Instant::now();
    let engine = Engine::new(cli.data_dir, source, active_types, config);
    let results = engine.execute();
    info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        queries = results.len(),
        "run finished"
    );

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for line in &results {
        writeln!(out, "{line}").context("writing results")?;
    }
    Ok(())
}
