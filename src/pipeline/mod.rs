//! Pipeline orchestration for history propagation and count filtering.

mod filter;
mod history;
mod metrics;
mod scheduler;

#[cfg(test)]
mod integration_tests;

pub use filter::{FilteredCounts, OrderFilter};
pub use history::{merge_history_files, HistoryPropagator, PropagatedHistory};
pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use scheduler::{ScheduleMode, Scheduler, SchedulerConfig, SchedulerStats};
