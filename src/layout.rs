//! File naming inside a count directory.
//!
//! Both the input directory and the filtered output directory use the same
//! naming scheme, so one type covers both.

use std::fmt;
use std::path::{Path, PathBuf};

/// Metadata files copied verbatim from input to output.
pub const REQUIRED_METADATA: [&str; 4] = ["num_train_sets", "num_words", "names", "words.txt"];

/// Metadata copied only when the input has it.
pub const OPTIONAL_METADATA: [&str; 1] = ["unigram_weights"];

/// Kind of logged step, used to name its log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    ExtractHistories,
    MergeHistories,
    FilterCounts,
}

impl LogKind {
    fn prefix(self) -> &'static str {
        match self {
            LogKind::ExtractHistories => "extract-histories",
            LogKind::MergeHistories => "merge-histories",
            LogKind::FilterCounts => "filter_counts",
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Paths of every file in a count directory.
#[derive(Debug, Clone)]
pub struct CountLayout {
    root: PathBuf,
}

impl CountLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A top-level file by name.
    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn num_train_sets(&self) -> PathBuf {
        self.file("num_train_sets")
    }

    pub fn names(&self) -> PathBuf {
        self.file("names")
    }

    pub fn ngram_order(&self) -> PathBuf {
        self.file("ngram_order")
    }

    /// Aggregate dev counts, `int.dev`.
    pub fn dev_counts(&self) -> PathBuf {
        self.file("int.dev")
    }

    /// Dev counts at one order, `int.dev.<o>`.
    pub fn dev_order_counts(&self, order: usize) -> PathBuf {
        self.file(&format!("int.dev.{}", order))
    }

    /// Training counts of one source at one order, `int.<n>.<o>`.
    pub fn train_counts(&self, source: usize, order: usize) -> PathBuf {
        self.file(&format!("int.{}.{}", source, order))
    }

    /// Shard `j` (1-based) of the filtered counts of one source at one order.
    pub fn train_shard(&self, source: usize, order: usize, shard: usize) -> PathBuf {
        self.file(&format!("int.{}.{}.split{}", source, order, shard))
    }

    /// Histories extracted from the dev counts at one order.
    pub fn dev_histories(&self, order: usize) -> PathBuf {
        self.file(&format!("lastest_hist.dev.{}", order))
    }

    /// Merged histories at one order (this order and every higher one).
    pub fn latest_histories(&self, order: usize) -> PathBuf {
        self.file(&format!("lastest_hist.{}", order))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("log")
    }

    /// Log of a per-order step.
    pub fn order_log(&self, kind: LogKind, order: usize) -> PathBuf {
        self.log_dir().join(format!("{}.{}.log", kind, order))
    }

    /// Log of a per-(source, order) step.
    pub fn source_log(&self, kind: LogKind, source: usize, order: usize) -> PathBuf {
        self.log_dir().join(format!("{}.{}.{}.log", kind, source, order))
    }
}

/// The orders processed in a run, highest first: `[M, M-1, .., 2]`.
pub fn orders_descending(max_order: usize) -> impl Iterator<Item = usize> {
    (2..=max_order).rev()
}
