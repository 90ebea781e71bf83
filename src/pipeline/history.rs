//! Dev-history extraction and propagation down the orders.
//!
//! The history set of order `o` holds every context seen in the dev counts
//! at order `o`, plus the history set of order `o + 1`. Computing it
//! therefore needs the order above to be finished; [`HistoryPropagator`]
//! checks that the artifact exists but the caller owns the ordering.
//!
//! The top order has nothing to merge with: its set is the extractor's
//! output copied as is. Lower orders are merged in byte order.

use crate::config::ToolsConfig;
use crate::error::{FilterError, Result};
use crate::exec::{CommandSpec, ProcessRunner};
use crate::layout::{CountLayout, LogKind};
use crate::pipeline::Metrics;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A history set written to disk.
#[derive(Debug, Clone)]
pub struct PropagatedHistory {
    pub order: usize,
    pub path: PathBuf,
    /// Number of distinct contexts in the set
    pub entries: usize,
}

/// Builds the `lastest_hist.<o>` artifacts in the output directory.
pub struct HistoryPropagator {
    input: CountLayout,
    output: CountLayout,
    tools: Arc<ToolsConfig>,
    runner: Arc<ProcessRunner>,
    metrics: Arc<Metrics>,
    max_order: usize,
}

impl HistoryPropagator {
    pub fn new(
        input: CountLayout,
        output: CountLayout,
        tools: Arc<ToolsConfig>,
        runner: Arc<ProcessRunner>,
        metrics: Arc<Metrics>,
        max_order: usize,
    ) -> Self {
        Self {
            input,
            output,
            tools,
            runner,
            metrics,
            max_order,
        }
    }

    pub fn max_order(&self) -> usize {
        self.max_order
    }

    /// Build the merged history set for `order`.
    ///
    /// For `order < max_order` the set for `order + 1` must already be on disk.
    pub async fn propagate(&self, order: usize) -> Result<PropagatedHistory> {
        if order < 2 || order > self.max_order {
            return Err(FilterError::Config(format!(
                "order {} outside 2..={}",
                order, self.max_order
            )));
        }

        let higher = if order < self.max_order {
            let higher = self.output.latest_histories(order + 1);
            if !higher.is_file() {
                self.metrics.add_failure();
                return Err(FilterError::MissingHistory {
                    order: order + 1,
                    path: higher,
                });
            }
            Some(higher)
        } else {
            None
        };

        let dev_histories = self.output.dev_histories(order);
        let extract = CommandSpec::new(self.tools.extract_histories())
            .stdin_from(self.input.dev_order_counts(order))
            .stdout_to(&dev_histories);
        self.runner
            .run(extract, &self.output.order_log(LogKind::ExtractHistories, order))
            .await?;

        let merged = self.output.latest_histories(order);
        let entries = match higher {
            Some(higher) => self.merge(order, dev_histories, higher, &merged).await?,
            None => {
                // the top order keeps the extractor's own ordering
                tokio::fs::copy(&dev_histories, &merged)
                    .await
                    .map_err(|source| FilterError::Copy {
                        src: dev_histories.clone(),
                        dest: merged.clone(),
                        source,
                    })?;
                let contents = tokio::fs::read(&merged)
                    .await
                    .map_err(FilterError::io(&merged))?;
                count_lines(&contents)
            }
        };

        self.metrics.add_history(entries as u64);
        tracing::debug!("Order {} history set: {} entries", order, entries);

        Ok(PropagatedHistory {
            order,
            path: merged,
            entries,
        })
    }

    /// Union of this order's dev histories and the set of the order above.
    async fn merge(
        &self,
        order: usize,
        dev_histories: PathBuf,
        higher: PathBuf,
        merged: &Path,
    ) -> Result<usize> {
        let inputs = vec![dev_histories, higher];

        let output = merged.to_path_buf();
        let merge_inputs = inputs.clone();
        let entries = tokio::task::spawn_blocking(move || merge_history_files(&merge_inputs, &output))
            .await
            .map_err(|e| FilterError::TaskPanicked(format!("merging histories: {}", e)))??;

        let log = self.output.order_log(LogKind::MergeHistories, order);
        let summary = format!(
            "merged {} into {}: {} histories\n",
            inputs
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(" "),
            merged.display(),
            entries
        );
        tokio::fs::write(&log, summary)
            .await
            .map_err(FilterError::io(&log))?;

        Ok(entries)
    }
}

/// Number of non-empty lines in a history list.
fn count_lines(contents: &[u8]) -> usize {
    contents
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .count()
}

/// Write the sorted, de-duplicated union of the lines of `inputs`.
///
/// Lines are compared as raw bytes, so the result does not depend on the
/// host locale. Empty lines are dropped. Returns the number of lines written.
pub fn merge_history_files(inputs: &[PathBuf], output: &Path) -> Result<usize> {
    let mut histories: BTreeSet<Vec<u8>> = BTreeSet::new();

    for input in inputs {
        let file = File::open(input).map_err(FilterError::io(input))?;
        for line in BufReader::new(file).split(b'\n') {
            let line = line.map_err(FilterError::io(input))?;
            if !line.is_empty() {
                histories.insert(line);
            }
        }
    }

    let file = File::create(output).map_err(FilterError::io(output))?;
    let mut writer = BufWriter::new(file);
    for history in &histories {
        writer
            .write_all(history)
            .and_then(|_| writer.write_all(b"\n"))
            .map_err(FilterError::io(output))?;
    }
    writer.flush().map_err(FilterError::io(output))?;

    Ok(histories.len())
}
