use crate::format::Format;
use crate::manifest::PageManifest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InputNotFound,
    ToolUnavailable,
    UnsupportedConversion,
    ProcessSpawnFailed,
    ProcessTimedOut,
    ProcessExitedNonZero,
    OutputNotProduced,
    PageCountExceeded,
    ConfigurationInvalid,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InputNotFound => "input_not_found",
            ErrorKind::ToolUnavailable => "tool_unavailable",
            ErrorKind::UnsupportedConversion => "unsupported_conversion",
            ErrorKind::ProcessSpawnFailed => "process_spawn_failed",
            ErrorKind::ProcessTimedOut => "process_timed_out",
            ErrorKind::ProcessExitedNonZero => "process_exited_non_zero",
            ErrorKind::OutputNotProduced => "output_not_produced",
            ErrorKind::PageCountExceeded => "page_count_exceeded",
            ErrorKind::ConfigurationInvalid => "configuration_invalid",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only error type that crosses the strategy boundary.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ConversionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ConversionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub input: PathBuf,
    pub source: Format,
    pub target: Format,
    pub output: PathBuf,
}

/// Result of one conversion attempt. Built once by a strategy and handed to
/// the caller; nothing mutates it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutcome {
    pub succeeded: bool,
    /// Ordered outputs. For a multi-page fan-out: every page file, then the manifest.
    pub output_paths: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PageManifest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub elapsed: Duration,
}

impl ConversionOutcome {
    pub fn success(output_paths: Vec<PathBuf>, elapsed: Duration) -> Self {
        Self {
            succeeded: true,
            output_paths,
            manifest: None,
            error_kind: None,
            error_message: None,
            elapsed,
        }
    }

    pub fn fan_out(output_paths: Vec<PathBuf>, manifest: PageManifest, elapsed: Duration) -> Self {
        Self {
            manifest: Some(manifest),
            ..Self::success(output_paths, elapsed)
        }
    }

    pub fn failure(err: ConversionError, elapsed: Duration) -> Self {
        Self {
            succeeded: false,
            output_paths: Vec::new(),
            manifest: None,
            error_kind: Some(err.kind),
            error_message: Some(err.message),
            elapsed,
        }
    }

    pub fn error(&self) -> Option<ConversionError> {
        self.error_kind.map(|kind| {
            ConversionError::new(kind, self.error_message.clone().unwrap_or_default())
        })
    }
}
