//! Ordering and concurrency of the per-order work.
//!
//! History sets are built from the top order down, each one after the one
//! above it. A filter job for (source, order) starts only once the history
//! set for that order is on disk. Sources are independent of each other.

use crate::error::{FilterError, Result};
use crate::layout::orders_descending;
use crate::pipeline::{FilteredCounts, HistoryPropagator, Metrics, MetricsReporter, OrderFilter};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

/// How jobs are launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// One job at a time, source by source, top order first.
    Sequential,
    /// Filter jobs overlap each other and the next order's history build.
    Concurrent,
}

impl ScheduleMode {
    pub fn from_parallel(parallel: bool) -> Self {
        if parallel {
            ScheduleMode::Concurrent
        } else {
            ScheduleMode::Sequential
        }
    }
}

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Sequential or concurrent launching
    pub mode: ScheduleMode,

    /// Maximum filter jobs in flight (concurrent mode)
    pub concurrency: usize,

    /// Enable progress reporting
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after run completes
    pub metrics_output_path: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mode: ScheduleMode::Concurrent,
            concurrency: 16,
            enable_metrics: true,
            metrics_interval_secs: 30,
            metrics_output_path: None,
        }
    }
}

/// Runs history propagation and count filtering for every source and order.
pub struct Scheduler {
    propagator: Arc<HistoryPropagator>,
    filter: Arc<OrderFilter>,
    num_sources: usize,
    metrics: Arc<Metrics>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        propagator: Arc<HistoryPropagator>,
        filter: Arc<OrderFilter>,
        num_sources: usize,
        metrics: Arc<Metrics>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            propagator,
            filter,
            num_sources,
            metrics,
            config,
        }
    }

    fn max_order(&self) -> usize {
        self.propagator.max_order()
    }

    /// Total jobs: one history build per order plus one filter per (source, order).
    pub fn total_jobs(&self) -> usize {
        let orders = orders_descending(self.max_order()).count();
        orders * (self.num_sources + 1)
    }

    /// Run every job. The first failure aborts the run.
    pub async fn run(&self) -> Result<SchedulerStats> {
        let total_jobs = self.total_jobs();

        tracing::info!(
            "Scheduling {} sources x {} orders ({:?}, {} concurrent)",
            self.num_sources,
            orders_descending(self.max_order()).count(),
            self.config.mode,
            self.config.concurrency
        );

        // Start metrics reporter if enabled
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let reporter_handle = if self.config.enable_metrics {
            let reporter = MetricsReporter::new(
                self.metrics.clone(),
                self.config.metrics_interval_secs,
                total_jobs as u64,
            );
            Some(tokio::spawn(reporter.run(shutdown_rx)))
        } else {
            drop(shutdown_rx);
            None
        };

        let result = match self.config.mode {
            ScheduleMode::Sequential => self.run_sequential().await,
            ScheduleMode::Concurrent => self.run_concurrent().await,
        };

        // Shutdown metrics reporter
        let _ = shutdown_tx.send(()).await;
        if let Some(handle) = reporter_handle {
            let _ = handle.await;
        }

        let filtered = result?;

        let mut stats = SchedulerStats {
            total_jobs,
            histories_built: orders_descending(self.max_order()).count(),
            ..Default::default()
        };
        for counts in &filtered {
            stats.counts_filtered += 1;
            if let FilteredCounts::Sharded(shards) = counts {
                stats.shards_written += shards.len();
            }
        }

        if self.config.enable_metrics {
            let reporter = MetricsReporter::new(
                self.metrics.clone(),
                self.config.metrics_interval_secs,
                total_jobs as u64,
            );
            reporter.log_summary();

            if let Some(ref path) = self.config.metrics_output_path {
                let snapshot = self.metrics.snapshot();
                if let Err(e) = snapshot.save_to_file(path) {
                    tracing::warn!("Failed to save metrics to {}: {}", path, e);
                }
            }
        }

        Ok(stats)
    }

    /// Source by source, top order first; the first source also builds the
    /// history set of each order right before filtering it.
    async fn run_sequential(&self) -> Result<Vec<FilteredCounts>> {
        let mut filtered = Vec::with_capacity(self.total_jobs());

        for source in 1..=self.num_sources {
            for order in orders_descending(self.max_order()) {
                if source == 1 {
                    self.propagator.propagate(order).await?;
                }
                filtered.push(self.filter.filter(source, order).await?);
            }
        }

        Ok(filtered)
    }

    /// Two stages connected by a channel.
    ///
    /// The history stage walks the orders top-down and announces each order
    /// once its history set is written. The filter stage expands every
    /// announced order into one job per source and runs them with bounded
    /// concurrency, overlapping the next order's history build.
    async fn run_concurrent(&self) -> Result<Vec<FilteredCounts>> {
        let max_order = self.max_order();
        let (ready_tx, ready_rx) = mpsc::channel::<usize>(max_order.max(1));

        let propagator = self.propagator.clone();
        let history_stage = async move {
            for order in orders_descending(max_order) {
                let history = propagator.propagate(order).await?;
                tracing::info!("Order {} histories ready ({} entries)", order, history.entries);
                if ready_tx.send(order).await.is_err() {
                    break;
                }
            }
            Ok::<(), FilterError>(())
        };

        let num_sources = self.num_sources;
        let filter = self.filter.clone();
        let filter_stage = stream::unfold(ready_rx, |mut rx| async move {
            rx.recv().await.map(|order| (order, rx))
        })
        .flat_map(move |order| stream::iter((1..=num_sources).map(move |source| (source, order))))
        .map(move |(source, order)| {
            let filter = filter.clone();
            async move { filter.filter(source, order).await }
        })
        .buffer_unordered(self.config.concurrency)
        .try_collect::<Vec<_>>();

        let ((), filtered) = futures::try_join!(history_stage, filter_stage)?;
        Ok(filtered)
    }
}

/// Statistics from a scheduler run.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// History builds plus filter jobs
    pub total_jobs: usize,

    /// Merged history sets written
    pub histories_built: usize,

    /// (source, order) count files filtered
    pub counts_filtered: usize,

    /// Shard files written
    pub shards_written: usize,
}

impl std::fmt::Display for SchedulerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Histories: {}, Filtered: {}, Shards: {}, Total jobs: {}",
            self.histories_built, self.counts_filtered, self.shards_written, self.total_jobs
        )
    }
}
