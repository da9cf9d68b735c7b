//! Error types for the time-lapse trigger.

use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by a [`TimerService`](crate::TimerService).
///
/// The trigger never retries; these reach the caller of
/// [`LapseTrigger::set_running`](crate::LapseTrigger::set_running) unchanged.
#[derive(Debug, Error)]
pub enum TimerError {
    /// The scheduler has been shut down and accepts no new jobs.
    #[error("scheduler is stopped")]
    SchedulerStopped,

    /// A recurring job needs a non-zero period.
    #[error("invalid period for job '{job_id}': must be greater than zero")]
    InvalidPeriod { job_id: String },

    /// The scheduler was created outside of an async runtime.
    #[error("no async runtime available to drive recurring jobs")]
    NoRuntime,
}

/// Errors loading or validating [`LapseSettings`](crate::LapseSettings).
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid settings: {message}")]
    Validation { message: String },
}

pub type SettingsResult<T> = Result<T, SettingsError>;
