//! Error types for TSDHN.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A post-condition or pre-execution file that was expected but absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingFile {
    pub path: PathBuf,
    pub message: String,
}

impl fmt::Display for MissingFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid skip steps: {}", .0.join(", "))]
    InvalidSkipSteps(Vec<String>),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("job is not completed, current status: {0}")]
    NotReady(crate::JobStatus),

    #[error("missing required system commands: {}", .0.join(", "))]
    MissingDependencies(Vec<String>),

    #[error("workspace error at {}: {source}", .path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("missing files:\n{}", format_missing(.0))]
    MissingFiles(Vec<MissingFile>),

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {}: {output}", format_code(.code))]
    CommandFailed {
        program: String,
        code: Option<i32>,
        output: String,
    },

    #[error("callback failed: {0}")]
    Callback(String),

    #[error("job failed at step '{step}': {source}")]
    JobFailed {
        step: String,
        #[source]
        source: Box<Error>,
    },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Taxonomy label persisted alongside failure messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) | Error::InvalidSkipSteps(_) | Error::InvalidPath(_) => {
                "ValidationError"
            }
            Error::NotFound(_) => "NotFoundError",
            Error::NotReady(_) => "NotReadyError",
            Error::MissingDependencies(_) => "DependencyError",
            Error::Workspace { .. } => "WorkspaceError",
            Error::MissingFiles(_)
            | Error::Spawn { .. }
            | Error::CommandFailed { .. }
            | Error::Callback(_) => "StepExecutionError",
            Error::JobFailed { source, .. } => source.kind(),
            Error::Timeout(_) => "TimeoutError",
            Error::Infrastructure(_) => "InfrastructureError",
            Error::Internal(_) => "InternalError",
        }
    }

    /// `"<kind>: <message>"`, the form stored in job metadata.
    pub fn describe(&self) -> String {
        match self {
            Error::JobFailed { source, .. } => source.describe(),
            other => format!("{}: {}", other.kind(), other),
        }
    }

    pub fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Workspace {
            path: path.into(),
            source,
        }
    }
}

fn format_missing(missing: &[MissingFile]) -> String {
    missing
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
