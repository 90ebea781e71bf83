//! Configuration for the count filtering pipeline.

use crate::error::FilterError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for a filtering run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Which count directories to read and write
    #[serde(default)]
    pub counts: CountsConfig,

    /// Where the external tools live
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// The filtering job itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountsConfig {
    /// Directory holding all training and dev counts (read-only)
    #[serde(default)]
    pub all_count_dir: PathBuf,

    /// Destination directory for the filtered counts
    #[serde(default)]
    pub filter_count_dir: PathBuf,

    /// Maximum n-gram order (must be at least 2)
    #[serde(default)]
    pub ngram_order: usize,

    /// Number of shards per filtered count file (0 = no sharding)
    #[serde(default)]
    pub num_splits: usize,
}

/// Paths of the external tools.
///
/// Relative paths are resolved against `bin_dir` when it is set, otherwise
/// they are looked up on `PATH` by the OS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Directory containing the tools
    #[serde(default)]
    pub bin_dir: Option<PathBuf>,

    /// Count directory validator, invoked as `<validator> <dir>`
    #[serde(default = "default_validator")]
    pub validator: PathBuf,

    /// Reads int counts on stdin, writes one history per line on stdout
    #[serde(default = "default_extract_histories")]
    pub extract_histories: PathBuf,

    /// `<filter> <int-counts> <hist-list>`, writes filtered counts on stdout
    #[serde(default = "default_filter_counts")]
    pub filter_counts: PathBuf,

    /// `<splitter> <out1> .. <outN>`, reads int counts on stdin
    #[serde(default = "default_split_counts")]
    pub split_counts: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            bin_dir: None,
            validator: default_validator(),
            extract_histories: default_extract_histories(),
            filter_counts: default_filter_counts(),
            split_counts: default_split_counts(),
        }
    }
}

impl ToolsConfig {
    /// Resolve a tool path against `bin_dir`.
    pub fn resolve(&self, tool: &Path) -> PathBuf {
        match &self.bin_dir {
            Some(dir) if tool.is_relative() => dir.join(tool),
            _ => tool.to_path_buf(),
        }
    }

    pub fn validator(&self) -> PathBuf {
        self.resolve(&self.validator)
    }

    pub fn extract_histories(&self) -> PathBuf {
        self.resolve(&self.extract_histories)
    }

    pub fn filter_counts(&self) -> PathBuf {
        self.resolve(&self.filter_counts)
    }

    pub fn split_counts(&self) -> PathBuf {
        self.resolve(&self.split_counts)
    }
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Process sources and orders concurrently
    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Log every command before running it
    #[serde(default)]
    pub verbose: bool,

    /// Maximum number of filter jobs running at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Enable periodic progress reporting
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            verbose: false,
            concurrency: default_concurrency(),
            worker_threads: None,
            enable_metrics: true,
            metrics_interval_secs: default_metrics_interval(),
            metrics_output_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "json" => serde_json::from_str(&contents)?,
            _ => serde_yaml::from_str(&contents)?,
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    ///
    /// Runs before anything touches the filesystem.
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.counts.ngram_order < 2 {
            return Err(FilterError::Config(format!(
                "ngram-order is {}; it must be at least 2. \
                 If you want a unigram LM, do it by hand",
                self.counts.ngram_order
            )));
        }
        if self.counts.all_count_dir.as_os_str().is_empty() {
            return Err(FilterError::Config("all-count-dir must be set".into()));
        }
        if self.counts.filter_count_dir.as_os_str().is_empty() {
            return Err(FilterError::Config("filter-count-dir must be set".into()));
        }
        if self.counts.all_count_dir == self.counts.filter_count_dir {
            return Err(FilterError::Config(format!(
                "input and output count directories are both {}",
                self.counts.all_count_dir.display()
            )));
        }
        if self.processing.concurrency == 0 {
            return Err(FilterError::Config("concurrency must be > 0".into()));
        }
        if self.processing.enable_metrics && self.processing.metrics_interval_secs == 0 {
            return Err(FilterError::Config("metrics interval must be > 0".into()));
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_validator() -> PathBuf { PathBuf::from("validate_count_dir.py") }
fn default_extract_histories() -> PathBuf { PathBuf::from("extract-latest-histories") }
fn default_filter_counts() -> PathBuf { PathBuf::from("filter-int-counts") }
fn default_split_counts() -> PathBuf { PathBuf::from("split-int-counts") }
fn default_true() -> bool { true }
fn default_concurrency() -> usize { 16 }
fn default_metrics_interval() -> u64 { 30 }
