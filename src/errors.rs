// src/errors.rs

//! Crate-wide error types.
//!
//! - [`GatedagError`] covers everything that aborts a run before it starts
//!   (plan loading, registration, graph construction).
//! - [`TaskError`] describes why a single task attempt failed. These never
//!   escape `run_all`; they end up in the task's `last_error` and in
//!   lifecycle events.
//! - [`BackendError`] is what a [`WorkerBackend`](crate::exec::WorkerBackend)
//!   reports from `start` / `stop`.

use std::time::Duration;

use thiserror::Error;

use crate::dag::TaskId;
use crate::types::WaitStage;

#[derive(Error, Debug)]
pub enum GatedagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Duplicate task id: {0}")]
    DuplicateId(TaskId),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("Cycle detected in task graph: {0}")]
    DagCycle(String),

    #[error("A run is already in progress")]
    RunInProgress,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GatedagError {
    /// Whether this error stems from an invalid task set or plan, as opposed
    /// to IO or runtime state.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            GatedagError::ConfigError(_)
                | GatedagError::DuplicateId(_)
                | GatedagError::UnknownDependency { .. }
                | GatedagError::DagCycle(_)
                | GatedagError::TomlError(_)
        )
    }
}

/// Failure of a single task attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("failed to acquire work unit: {0}")]
    AcquisitionFailure(String),

    #[error("approval denied")]
    ApprovalDenied,

    #[error("work unit {handle} stopped before declared completion: {detail}")]
    UnexpectedStop { handle: String, detail: String },

    #[error("timed out after {waited:?} waiting for {stage}")]
    Timeout { stage: WaitStage, waited: Duration },

    #[error("failed to stop work unit {handle}: {message}")]
    ShutdownError { handle: String, message: String },

    #[error("run was cancelled")]
    Cancelled,
}

/// Errors reported by worker backends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("invalid work config: {0}")]
    InvalidConfig(String),

    #[error("start failed: {0}")]
    Start(String),

    #[error("stop failed: {0}")]
    Stop(String),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, GatedagError>;
