//! Error types for the grading run.
//!
//! Only [`SetupError`] ever escapes a run. Everything else is scoped to a
//! single job and is folded into that job's `JobOutcome::Failed`.

use std::time::Duration;

use labgrade_core::ConfigError;
use thiserror::Error;

/// Fatal problems detected before any job is scheduled.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("enrollment source unavailable: {0}")]
    Enrollment(#[from] EnrollmentError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("reporter setup failed: {0}")]
    Reporter(String),
}

#[derive(Debug, Error)]
pub enum EnrollmentError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing to resolve path for {0:?}")]
    InvalidKey(String),
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to start sandbox: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("sandbox IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sandbox exited with status {code:?}: {diagnostics}")]
    NonZeroExit {
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("sandbox exceeded its memory limit: {diagnostics}")]
    OutOfMemory { diagnostics: String },

    #[error("sandbox timed out after {0:?}")]
    TimedOut(Duration),
}

impl SandboxError {
    /// Exit status for the failure, if the process got as far as exiting.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            SandboxError::NonZeroExit { code, .. } => *code,
            SandboxError::OutOfMemory { .. } => Some(137),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("outcome service returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("launch context has no {0}")]
    MissingContext(&'static str),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("concurrency limit must be at least 1, got {0}")]
    InvalidLimit(usize),
}
