//! N-gram count filtering by dev-set histories.
//!
//! Keeps only the training n-grams whose history (the first `order - 1`
//! words) occurs in the dev data at that order or at any higher one.
//!
//! # Architecture
//!
//! - **Stage**: validates the count directories, copies metadata and dev data
//! - **Exec**: runs the external count tools with per-command logs
//! - **Pipeline**: builds the merged history sets top-down and filters every
//!   (source, order) count file once its history set is ready
//!
//! # Usage
//!
//! ```no_run
//! use ngram_filter::{run_pipeline, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::default();
//!     config.counts.all_count_dir = "data/counts_3".into();
//!     config.counts.filter_count_dir = "data/counts_f3".into();
//!     config.counts.ngram_order = 3;
//!     run_pipeline(config).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod exec;
pub mod layout;
pub mod pipeline;
pub mod stage;

#[cfg(test)]
mod test_support;

pub use config::{Config, CountsConfig, ProcessingConfig, ToolsConfig};
pub use error::FilterError;
pub use exec::{CommandPipeline, CommandSpec, ProcessRunner};
pub use layout::CountLayout;
pub use pipeline::{
    HistoryPropagator, Metrics, OrderFilter, ScheduleMode, Scheduler, SchedulerConfig,
    SchedulerStats,
};
pub use stage::DirectoryStager;

use std::sync::Arc;

/// Run the full filtering pipeline with the given configuration.
///
/// Nothing is written before the configuration and the input directory
/// have been validated.
pub async fn run_pipeline(config: Config) -> Result<SchedulerStats, FilterError> {
    config.validate()?;

    let counts = &config.counts;
    let input = CountLayout::new(&counts.all_count_dir);
    let output = CountLayout::new(&counts.filter_count_dir);
    let tools = Arc::new(config.tools.clone());

    let metrics = Metrics::new();
    let runner = Arc::new(ProcessRunner::new(config.processing.verbose, metrics.clone()));
    let stager = DirectoryStager::new(input.clone(), output.clone(), tools.clone(), runner.clone());

    stager.validate_input().await?;
    let num_sources = stager.read_sources()?;

    stager.prepare_output().await?;
    stager.copy_metadata().await?;
    stager.save_ngram_order(counts.ngram_order).await?;

    let propagator = Arc::new(HistoryPropagator::new(
        input.clone(),
        output.clone(),
        tools.clone(),
        runner.clone(),
        metrics.clone(),
        counts.ngram_order,
    ));
    let filter = Arc::new(OrderFilter::new(
        input,
        output,
        tools,
        runner,
        metrics.clone(),
        counts.num_splits,
    ));

    let scheduler_config = SchedulerConfig {
        mode: ScheduleMode::from_parallel(config.processing.parallel),
        concurrency: config.processing.concurrency,
        enable_metrics: config.processing.enable_metrics,
        metrics_interval_secs: config.processing.metrics_interval_secs,
        metrics_output_path: config.processing.metrics_output_path.clone(),
    };
    let scheduler = Scheduler::new(propagator, filter, num_sources, metrics, scheduler_config);

    tracing::info!("Filtering counts");
    let stats = scheduler.run().await?;

    stager.copy_dev_data(counts.ngram_order).await?;
    tracing::info!("Done: {}", stats);

    stager.validate_output().await?;

    Ok(stats)
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> anyhow::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}
