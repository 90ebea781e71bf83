//! Count directory staging: validation, metadata and dev-data copies.

use crate::config::ToolsConfig;
use crate::error::{FilterError, Result};
use crate::exec::{CommandSpec, ProcessRunner};
use crate::layout::{orders_descending, CountLayout, OPTIONAL_METADATA, REQUIRED_METADATA};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Read `num_train_sets`: a single integer on a single line.
pub fn read_num_train_sets(path: &Path) -> Result<usize> {
    let contents = std::fs::read_to_string(path).map_err(FilterError::io(path))?;
    let bad = |reason: &str| FilterError::Metadata {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let mut lines = contents.lines();
    let first = lines.next().ok_or_else(|| bad("file is empty"))?;
    let num_train_sets = first
        .trim()
        .parse::<usize>()
        .map_err(|_| bad(&format!("expected an integer, got '{}'", first)))?;
    if lines.next().is_some() {
        return Err(bad("expected a single line"));
    }
    Ok(num_train_sets)
}

/// Read the `names` file (`<id> <name>` per line) into an id → name map.
pub fn read_names(path: &Path) -> Result<BTreeMap<usize, String>> {
    let contents = std::fs::read_to_string(path).map_err(FilterError::io(path))?;
    let mut names = BTreeMap::new();

    for line in contents.lines() {
        let bad = |reason: String| FilterError::Metadata {
            path: path.to_path_buf(),
            reason,
        };
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [id, name] = fields.as_slice() else {
            return Err(bad(format!("bad line '{}'", line)));
        };
        let id = id
            .parse::<usize>()
            .map_err(|_| bad(format!("bad line '{}'", line)))?;
        if names.insert(id, name.to_string()).is_some() {
            return Err(bad(format!("duplicate number {}", id)));
        }
    }

    Ok(names)
}

/// Prepares and checks the input and output count directories.
pub struct DirectoryStager {
    input: CountLayout,
    output: CountLayout,
    tools: Arc<ToolsConfig>,
    runner: Arc<ProcessRunner>,
}

impl DirectoryStager {
    pub fn new(
        input: CountLayout,
        output: CountLayout,
        tools: Arc<ToolsConfig>,
        runner: Arc<ProcessRunner>,
    ) -> Self {
        Self {
            input,
            output,
            tools,
            runner,
        }
    }

    /// Run the external validator on `dir`.
    pub async fn validate(&self, dir: &Path) -> Result<()> {
        let spec = CommandSpec::new(self.tools.validator()).arg(dir);
        let status = self.runner.run_attached(&spec).await?;
        if !status.success() {
            return Err(FilterError::Validation {
                dir: dir.to_path_buf(),
            });
        }
        Ok(())
    }

    pub async fn validate_input(&self) -> Result<()> {
        self.validate(self.input.root()).await
    }

    pub async fn validate_output(&self) -> Result<()> {
        self.validate(self.output.root()).await
    }

    /// Read and check the input metadata, returning the number of sources.
    pub fn read_sources(&self) -> Result<usize> {
        let num_train_sets = read_num_train_sets(&self.input.num_train_sets())?;
        if num_train_sets == 0 {
            return Err(FilterError::Metadata {
                path: self.input.num_train_sets(),
                reason: "no training sets".to_string(),
            });
        }

        let names = read_names(&self.input.names())?;
        if names.len() != num_train_sets {
            tracing::warn!(
                "{} lists {} sources but num_train_sets is {}",
                self.input.names().display(),
                names.len(),
                num_train_sets
            );
        }
        Ok(num_train_sets)
    }

    /// Create the output directory and its `log/` subdirectory.
    pub async fn prepare_output(&self) -> Result<()> {
        let log_dir = self.output.log_dir();
        tokio::fs::create_dir_all(&log_dir)
            .await
            .map_err(FilterError::io(&log_dir))
    }

    /// Copy the metadata files verbatim; `unigram_weights` only if present.
    pub async fn copy_metadata(&self) -> Result<()> {
        for name in REQUIRED_METADATA {
            self.copy(name).await?;
        }
        for name in OPTIONAL_METADATA {
            if self.input.file(name).is_file() {
                self.copy(name).await?;
            }
        }
        Ok(())
    }

    /// Record the n-gram order of the filtered counts.
    pub async fn save_ngram_order(&self, ngram_order: usize) -> Result<()> {
        if ngram_order < 2 {
            return Err(FilterError::Config(format!(
                "refusing to record ngram order {}",
                ngram_order
            )));
        }
        let path = self.output.ngram_order();
        tokio::fs::write(&path, format!("{}\n", ngram_order))
            .await
            .map_err(FilterError::io(&path))
    }

    /// Copy `int.dev` and `int.dev.<o>` for every order, for later evaluation.
    pub async fn copy_dev_data(&self, ngram_order: usize) -> Result<()> {
        self.copy("int.dev").await?;
        for order in orders_descending(ngram_order) {
            self.copy(&format!("int.dev.{}", order)).await?;
        }
        Ok(())
    }

    async fn copy(&self, name: &str) -> Result<()> {
        let src = self.input.file(name);
        let dest = self.output.file(name);
        tokio::fs::copy(&src, &dest)
            .await
            .map(|_| ())
            .map_err(|source| FilterError::Copy { src, dest, source })
    }
}
