//! Error taxonomy for the filtering pipeline.
//!
//! Every failure is fatal to the run. Files already written are left in place.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Errors raised while staging, scheduling or running the filter.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("bad metadata in {path}: {reason}")]
    Metadata { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error copying {src} to {dest}: {source}")]
    Copy {
        src: PathBuf,
        dest: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A tool could not be started. `log` is unset for commands attached
    /// to the terminal.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        log: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    #[error("command '{command}' failed with {status}; see {log}")]
    CommandFailed {
        command: String,
        status: ExitStatus,
        log: PathBuf,
    },

    #[error("history set for order {order} is missing at {path}")]
    MissingHistory { order: usize, path: PathBuf },

    #[error("count directory {dir} failed validation")]
    Validation { dir: PathBuf },

    #[error("background task failed: {0}")]
    TaskPanicked(String),
}

impl FilterError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| FilterError::Io { path, source }
    }

    /// The log file to inspect for this failure, if there is one.
    pub fn log_path(&self) -> Option<&PathBuf> {
        match self {
            FilterError::Spawn { log, .. } => log.as_ref(),
            FilterError::CommandFailed { log, .. } => Some(log),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FilterError>;
