//! Progress monitoring and metrics collection.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for a filtering run.
#[derive(Debug, Default)]
pub struct Metrics {
    /// External commands that ran to completion
    pub commands_run: AtomicU64,

    /// Wall time spent waiting on external commands (microseconds, summed)
    pub command_us: AtomicU64,

    /// Merged history sets written
    pub histories_built: AtomicU64,

    /// Entries across all merged history sets
    pub history_entries: AtomicU64,

    /// (source, order) count files filtered
    pub counts_filtered: AtomicU64,

    /// Shard files written
    pub shards_written: AtomicU64,

    /// Number of failed operations
    pub failures: AtomicU64,

    /// Start time
    start_time: Option<Instant>,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    /// Record one finished external command.
    pub fn add_command(&self, duration: Duration) {
        self.commands_run.fetch_add(1, Ordering::Relaxed);
        self.command_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a merged history set with `entries` lines.
    pub fn add_history(&self, entries: u64) {
        self.histories_built.fetch_add(1, Ordering::Relaxed);
        self.history_entries.fetch_add(entries, Ordering::Relaxed);
    }

    /// Record one filtered (source, order) count file.
    pub fn add_counts_filtered(&self, shards: u64) {
        self.counts_filtered.fetch_add(1, Ordering::Relaxed);
        self.shards_written.fetch_add(shards, Ordering::Relaxed);
    }

    /// Record a failure.
    pub fn add_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commands_run: self.commands_run.load(Ordering::Relaxed),
            command_secs: self.command_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            histories_built: self.histories_built.load(Ordering::Relaxed),
            history_entries: self.history_entries.load(Ordering::Relaxed),
            counts_filtered: self.counts_filtered.load(Ordering::Relaxed),
            shards_written: self.shards_written.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub commands_run: u64,
    /// Total time spent in external commands (seconds, summed across jobs)
    pub command_secs: f64,
    pub histories_built: u64,
    pub history_entries: u64,
    pub counts_filtered: u64,
    pub shards_written: u64,
    pub failures: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Histories: {} ({} entries) | Counts filtered: {} ({} shards) | \
             Commands: {} ({:.1}s) | Failures: {} | Elapsed: {:.1}s",
            self.histories_built,
            self.history_entries,
            self.counts_filtered,
            self.shards_written,
            self.commands_run,
            self.command_secs,
            self.failures,
            self.elapsed.as_secs_f64(),
        )
    }
}

/// Periodic metrics reporter.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
    total_jobs: u64,
}

impl MetricsReporter {
    /// Create a new metrics reporter.
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64, total_jobs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
            total_jobs,
        }
    }

    fn progress(&self, snapshot: &MetricsSnapshot) -> f64 {
        if self.total_jobs > 0 {
            (snapshot.histories_built + snapshot.counts_filtered) as f64 / self.total_jobs as f64
                * 100.0
        } else {
            0.0
        }
    }

    /// Start the periodic reporter.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));
        // the first tick fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.metrics.snapshot();
                    tracing::info!("[{:.1}%] {}", self.progress(&snapshot), snapshot);
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }
    }

    /// Log a final summary.
    pub fn log_summary(&self) {
        let snapshot = self.metrics.snapshot();
        tracing::info!("Final: [{:.1}%] {}", self.progress(&snapshot), snapshot);
    }
}
