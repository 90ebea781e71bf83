//! Spawning tool pipelines with their diagnostics captured to a log file.

use crate::error::{FilterError, Result};
use crate::pipeline::Metrics;
use std::ffi::OsString;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Instant;
use tokio::process::{Child, Command};

/// One external command with optional file redirections.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: PathBuf,
    args: Vec<OsString>,
    stdin: Option<PathBuf>,
    stdout: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            stdout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feed stdin from a file.
    pub fn stdin_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    /// Write stdout to a file, truncating it.
    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        if let Some(stdin) = &self.stdin {
            write!(f, " <{}", stdin.display())?;
        }
        if let Some(stdout) = &self.stdout {
            write!(f, " >{}", stdout.display())?;
        }
        Ok(())
    }
}

/// Commands connected stdout-to-stdin.
///
/// Only the first stage may read a file and only the last may write one.
#[derive(Debug, Clone)]
pub struct CommandPipeline {
    stages: Vec<CommandSpec>,
}

impl CommandPipeline {
    pub fn new(first: CommandSpec) -> Self {
        Self { stages: vec![first] }
    }

    /// Append a stage reading the previous stage's stdout.
    pub fn pipe(mut self, next: CommandSpec) -> Self {
        self.stages.push(next);
        self
    }

    pub fn stages(&self) -> &[CommandSpec] {
        &self.stages
    }

    fn check_redirections(&self) -> Result<()> {
        let last = self.stages.len() - 1;
        for (i, stage) in self.stages.iter().enumerate() {
            if (i > 0 && stage.stdin.is_some()) || (i < last && stage.stdout.is_some()) {
                return Err(FilterError::Config(format!(
                    "stage '{}' redirects a piped stream in '{}'",
                    stage.program.display(),
                    self
                )));
            }
        }
        Ok(())
    }
}

impl From<CommandSpec> for CommandPipeline {
    fn from(spec: CommandSpec) -> Self {
        Self::new(spec)
    }
}

impl fmt::Display for CommandPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{}", stage)?;
        }
        Ok(())
    }
}

/// Runs external commands, failing on the first non-zero exit. Nothing is
/// retried.
#[derive(Debug)]
pub struct ProcessRunner {
    verbose: bool,
    metrics: Arc<Metrics>,
}

impl ProcessRunner {
    pub fn new(verbose: bool, metrics: Arc<Metrics>) -> Self {
        Self { verbose, metrics }
    }

    /// Run a pipeline with every stage's stderr appended to `log_path`.
    ///
    /// The log also receives the last stage's stdout when it is not
    /// redirected to a file. All stages are awaited and any non-zero stage
    /// fails the whole pipeline.
    pub async fn run(&self, pipeline: impl Into<CommandPipeline>, log_path: &Path) -> Result<()> {
        let pipeline = pipeline.into();
        pipeline.check_redirections()?;

        let rendered = pipeline.to_string();
        if self.verbose {
            tracing::info!("Running: {}", rendered);
        } else {
            tracing::debug!("Running: {}", rendered);
        }

        let log = create_file(log_path).await?;
        let start = Instant::now();

        let children = match spawn_stages(&pipeline, &log, log_path).await {
            Ok(children) => children,
            Err(e) => {
                self.metrics.add_failure();
                return Err(e);
            }
        };

        let mut failure: Option<ExitStatus> = None;
        for mut child in children {
            let status = child.wait().await.map_err(FilterError::io(log_path))?;
            if !status.success() && failure.is_none() {
                failure = Some(status);
            }
        }
        self.metrics.add_command(start.elapsed());

        match failure {
            None => Ok(()),
            Some(status) => {
                self.metrics.add_failure();
                tracing::error!("Command failed ({}): {}", status, rendered);
                Err(FilterError::CommandFailed {
                    command: rendered,
                    status,
                    log: log_path.to_path_buf(),
                })
            }
        }
    }

    /// Run a single command attached to this process's stdio.
    pub async fn run_attached(&self, spec: &CommandSpec) -> Result<ExitStatus> {
        if self.verbose {
            tracing::info!("Running: {}", spec);
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args).kill_on_drop(true);
        let start = Instant::now();
        let status = cmd.status().await.map_err(|source| {
            self.metrics.add_failure();
            FilterError::Spawn {
                program: spec.program.display().to_string(),
                log: None,
                source,
            }
        })?;
        self.metrics.add_command(start.elapsed());
        Ok(status)
    }
}

async fn create_file(path: &Path) -> Result<File> {
    let file = tokio::fs::File::create(path)
        .await
        .map_err(FilterError::io(path))?;
    Ok(file.into_std().await)
}

async fn open_file(path: &Path) -> Result<File> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(FilterError::io(path))?;
    Ok(file.into_std().await)
}

fn log_stdio(log: &File, log_path: &Path) -> Result<Stdio> {
    log.try_clone()
        .map(Stdio::from)
        .map_err(FilterError::io(log_path))
}

/// Spawn every stage, wiring each stdout into the next stdin.
///
/// Children already spawned are killed when the returned error drops them.
async fn spawn_stages(
    pipeline: &CommandPipeline,
    log: &File,
    log_path: &Path,
) -> Result<Vec<Child>> {
    let stages = pipeline.stages();
    let last = stages.len() - 1;
    let mut children = Vec::with_capacity(stages.len());
    let mut upstream: Option<Stdio> = None;

    for (i, stage) in stages.iter().enumerate() {
        let mut cmd = Command::new(&stage.program);
        cmd.args(&stage.args)
            .stderr(log_stdio(log, log_path)?)
            .kill_on_drop(true);

        let stdin = match (upstream.take(), &stage.stdin) {
            (Some(pipe), _) => pipe,
            (None, Some(path)) => Stdio::from(open_file(path).await?),
            (None, None) => Stdio::null(),
        };
        cmd.stdin(stdin);

        if i < last {
            cmd.stdout(Stdio::piped());
        } else if let Some(path) = &stage.stdout {
            cmd.stdout(Stdio::from(create_file(path).await?));
        } else {
            cmd.stdout(log_stdio(log, log_path)?);
        }

        let mut child = cmd.spawn().map_err(|source| {
            let mut log = log;
            let _ = writeln!(log, "failed to start {}: {}", stage.program.display(), source);
            FilterError::Spawn {
                program: stage.program.display().to_string(),
                log: Some(log_path.to_path_buf()),
                source,
            }
        })?;

        if i < last {
            let stdout = child.stdout.take().ok_or_else(|| FilterError::Io {
                path: stage.program.clone(),
                source: io::Error::new(io::ErrorKind::BrokenPipe, "stdout was not captured"),
            })?;
            let pipe: Stdio = TryInto::<Stdio>::try_into(stdout).map_err(FilterError::io(log_path))?;
            upstream = Some(pipe);
        }
        children.push(child);
    }

    Ok(children)
}
