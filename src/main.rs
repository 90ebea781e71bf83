//! filter-counts CLI
//!
//! Filters int counts of training data by the histories of the dev data.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ngram_filter::{build_runtime, run_pipeline, Config};

#[derive(Parser)]
#[command(name = "filter-counts")]
#[command(
    about = "Filter int counts of training data by dev data",
    long_about = "Keeps only the training n-grams whose history occurs in the dev data.\n\
                  e.g.: filter-counts data/counts_3 3 data/counts_f3"
)]
struct Cli {
    /// Directory with all training and dev counts
    all_count_dir: PathBuf,

    /// Order of the n-grams (at least 2)
    ngram_order: usize,

    /// Destination for the filtered counts
    filter_count_dir: PathBuf,

    /// Process data sources in parallel [default: true]
    #[arg(long, action = ArgAction::Set)]
    parallel: Option<bool>,

    /// Print commands as they are executed [default: false]
    #[arg(long, action = ArgAction::Set)]
    verbose: Option<bool>,

    /// Split each filtered count file into this many shards
    #[arg(long)]
    num_splits: Option<usize>,

    /// Maximum number of filter jobs running at once
    #[arg(long)]
    jobs: Option<usize>,

    /// Directory containing the count tools
    #[arg(long)]
    tools_dir: Option<PathBuf>,

    /// Optional YAML or JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Cli {
    /// Merge the command line over the configuration file, if any.
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => Config::default(),
        };

        config.counts.all_count_dir = self.all_count_dir;
        config.counts.ngram_order = self.ngram_order;
        config.counts.filter_count_dir = self.filter_count_dir;
        if let Some(splits) = self.num_splits {
            config.counts.num_splits = splits;
        }

        if let Some(parallel) = self.parallel {
            config.processing.parallel = parallel;
        }
        if let Some(verbose) = self.verbose {
            config.processing.verbose = verbose;
        }
        if let Some(jobs) = self.jobs {
            config.processing.concurrency = jobs;
        }
        if let Some(dir) = self.tools_dir {
            config.tools.bin_dir = Some(dir);
        }

        Ok(config)
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = Cli::parse().into_config()?;

    // Reject bad arguments before anything touches the filesystem
    config.validate()?;

    let runtime = build_runtime(config.processing.worker_threads)?;
    runtime.block_on(async { run_pipeline(config).await })?;

    Ok(())
}
