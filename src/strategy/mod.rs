//! Conversion strategies and the plumbing they share.

pub mod document;
pub mod pipeline;
pub mod raster;

use crate::config::Config;
use crate::format::ConversionPair;
use crate::outcome::{ConversionError, ConversionOutcome, ErrorKind};
use crate::probe::{Tool, ToolKey, ToolProbe};
use crate::process::{CancelToken, ProcessError, ProcessRunner, ToolCommand, ToolInvocation};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, warn};

pub use document::DocumentConversion;
pub use pipeline::PdfRasterPipeline;
pub use raster::RasterConversion;

/// One algorithm for one (source, target) pair.
pub trait ConversionStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn pair(&self) -> ConversionPair;
    fn required_tools(&self) -> Vec<ToolKey>;
    fn context(&self) -> &StrategyContext;

    fn verify_tool_available(&self) -> Result<(), ConversionError> {
        for key in self.required_tools() {
            if !self.context().probe.is_available(key) {
                return Err(ConversionError::new(
                    ErrorKind::ToolUnavailable,
                    format!("{key} is not available"),
                ));
            }
        }
        Ok(())
    }

    /// Never panics or returns a raw error; every failure lands on the outcome.
    fn execute(&self, input: &Path, output: &Path, cancel: &CancelToken) -> ConversionOutcome;
}

/// Everything a strategy needs from its surroundings.
pub struct StrategyContext {
    pub config: Config,
    pub runner: ProcessRunner,
    pub probe: Arc<ToolProbe>,
}

impl StrategyContext {
    pub fn new(config: Config) -> Self {
        let runner = ProcessRunner::from_config(&config);
        let probe = Arc::new(ToolProbe::new(&config, runner.clone()));
        Self {
            config,
            runner,
            probe,
        }
    }

    pub fn binary(&self, tool: Tool) -> &str {
        match tool {
            Tool::Magick => &self.config.tools.magick,
            Tool::Soffice => &self.config.tools.soffice,
            Tool::Ghostscript => &self.config.tools.ghostscript,
        }
    }

    pub fn scratch(&self, prefix: &str) -> Result<ScratchDir, ConversionError> {
        ScratchDir::create(&self.config.work_dir(), prefix)
    }

    /// Runs a tool and insists on a zero exit.
    pub fn run_checked(
        &self,
        cmd: &ToolCommand,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ToolInvocation, ConversionError> {
        let out = self.runner.run_cancellable(cmd, timeout, cancel)?;
        Ok(out.check(&cmd.program)?)
    }
}

impl From<ProcessError> for ConversionError {
    fn from(err: ProcessError) -> Self {
        let kind = match &err {
            ProcessError::Spawn { .. } | ProcessError::Supervise { .. } => {
                ErrorKind::ProcessSpawnFailed
            }
            ProcessError::TimedOut { .. } => ErrorKind::ProcessTimedOut,
            ProcessError::Cancelled { .. } => ErrorKind::Cancelled,
            ProcessError::NonZeroExit { .. } => ErrorKind::ProcessExitedNonZero,
        };
        ConversionError::new(kind, err.to_string())
    }
}

/// Per-invocation working directory, removed when dropped on every path out
/// of a strategy. Removal failures are logged only.
pub struct ScratchDir {
    dir: Option<TempDir>,
}

impl ScratchDir {
    pub fn create(root: &Path, prefix: &str) -> Result<Self, ConversionError> {
        let dir = std::fs::create_dir_all(root)
            .and_then(|_| tempfile::Builder::new().prefix(prefix).tempdir_in(root))
            .map_err(|e| {
                ConversionError::new(
                    ErrorKind::ConfigurationInvalid,
                    format!("cannot create scratch dir under {}: {e}", root.display()),
                )
            })?;
        debug!("scratch dir {}", dir.path().display());
        Ok(Self { dir: Some(dir) })
    }

    pub fn path(&self) -> &Path {
        self.dir.as_ref().map(|d| d.path()).unwrap_or_else(|| Path::new(""))
    }

    pub fn subdir(&self, name: &str) -> Result<PathBuf, ConversionError> {
        let p = self.path().join(name);
        std::fs::create_dir_all(&p).map_err(|e| {
            ConversionError::new(
                ErrorKind::ConfigurationInvalid,
                format!("cannot create {}: {e}", p.display()),
            )
        })?;
        Ok(p)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(err) = dir.close() {
                warn!("failed to remove scratch dir {}: {err}", path.display());
            }
        }
    }
}

pub(crate) fn check_input(input: &Path) -> Result<(), ConversionError> {
    if input.is_file() {
        return Ok(());
    }
    Err(ConversionError::new(
        ErrorKind::InputNotFound,
        format!("input does not exist: {}", input.display()),
    ))
}

pub(crate) fn prepare_output(output: &Path) -> Result<(), ConversionError> {
    match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            crate::util::ensure_dir(parent).map_err(|e| {
                ConversionError::new(ErrorKind::OutputNotProduced, format!("{e:#}"))
            })
        }
        _ => Ok(()),
    }
}

/// Fails with `OutputNotProduced` unless `path` is a non-empty file; empty
/// leftovers are removed.
pub(crate) fn require_output(path: &Path) -> Result<(), ConversionError> {
    match crate::util::file_len(path) {
        Some(len) if len > 0 => Ok(()),
        Some(_) => {
            crate::util::delete_file(path);
            Err(ConversionError::new(
                ErrorKind::OutputNotProduced,
                format!("tool produced an empty file: {}", path.display()),
            ))
        }
        None => Err(ConversionError::new(
            ErrorKind::OutputNotProduced,
            format!("expected output missing: {}", path.display()),
        )),
    }
}

pub(crate) fn move_into_place(from: &Path, to: &Path) -> Result<(), ConversionError> {
    crate::util::relocate(from, to)
        .map_err(|e| ConversionError::new(ErrorKind::OutputNotProduced, format!("{e:#}")))
}
