//! Filtering one source's counts at one order against the merged histories.

use crate::config::ToolsConfig;
use crate::error::{FilterError, Result};
use crate::exec::{CommandPipeline, CommandSpec, ProcessRunner};
use crate::layout::{CountLayout, LogKind};
use crate::pipeline::Metrics;
use std::path::PathBuf;
use std::sync::Arc;

/// Where the filtered counts of one (source, order) ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilteredCounts {
    Single(PathBuf),
    Sharded(Vec<PathBuf>),
}

impl FilteredCounts {
    pub fn paths(&self) -> &[PathBuf] {
        match self {
            FilteredCounts::Single(path) => std::slice::from_ref(path),
            FilteredCounts::Sharded(paths) => paths,
        }
    }
}

/// Runs `filter-int-counts`, optionally piped into `split-int-counts`.
pub struct OrderFilter {
    input: CountLayout,
    output: CountLayout,
    tools: Arc<ToolsConfig>,
    runner: Arc<ProcessRunner>,
    metrics: Arc<Metrics>,
    num_splits: usize,
}

impl OrderFilter {
    pub fn new(
        input: CountLayout,
        output: CountLayout,
        tools: Arc<ToolsConfig>,
        runner: Arc<ProcessRunner>,
        metrics: Arc<Metrics>,
        num_splits: usize,
    ) -> Self {
        Self {
            input,
            output,
            tools,
            runner,
            metrics,
            num_splits,
        }
    }

    /// Build the command for one (source, order) without running it.
    pub fn command(&self, source: usize, order: usize) -> (CommandPipeline, FilteredCounts) {
        let filter = CommandSpec::new(self.tools.filter_counts())
            .arg(self.input.train_counts(source, order))
            .arg(self.output.latest_histories(order));

        if self.num_splits == 0 {
            let dest = self.output.train_counts(source, order);
            let pipeline = CommandPipeline::new(filter.stdout_to(&dest));
            (pipeline, FilteredCounts::Single(dest))
        } else {
            let shards: Vec<PathBuf> = (1..=self.num_splits)
                .map(|j| self.output.train_shard(source, order, j))
                .collect();
            let split = CommandSpec::new(self.tools.split_counts()).args(shards.iter());
            let pipeline = CommandPipeline::new(filter).pipe(split);
            (pipeline, FilteredCounts::Sharded(shards))
        }
    }

    /// Filter the counts of `source` at `order`.
    ///
    /// The merged history set for `order` must already be on disk.
    pub async fn filter(&self, source: usize, order: usize) -> Result<FilteredCounts> {
        let histories = self.output.latest_histories(order);
        if !histories.is_file() {
            self.metrics.add_failure();
            return Err(FilterError::MissingHistory {
                order,
                path: histories,
            });
        }

        let (pipeline, filtered) = self.command(source, order);
        let log = self.output.source_log(LogKind::FilterCounts, source, order);
        self.runner.run(pipeline, &log).await?;

        let shards = match &filtered {
            FilteredCounts::Single(_) => 0,
            FilteredCounts::Sharded(paths) => paths.len() as u64,
        };
        self.metrics.add_counts_filtered(shards);
        tracing::debug!("Filtered source {} order {}", source, order);

        Ok(filtered)
    }
}
