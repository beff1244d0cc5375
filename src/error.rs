// ABOUTME: Error types for scheduler configuration and task execution
// ABOUTME: Separates fatal pre-run configuration errors from recoverable per-task failures

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Fatal configuration errors, raised synchronously by [`Scheduler::run`]
/// before any task starts.
///
/// [`Scheduler::run`]: crate::Scheduler::run
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("circular dependency detected involving task '{task}'")]
    CircularDependency { task: String },

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    MissingDependency { task: String, dependency: String },

    #[error("duplicate task id '{id}'")]
    DuplicateTaskId { id: String },
}

/// A single task's terminating error. Captured into the run report's
/// failure map, never thrown out of the scheduler.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("cancelled")]
    Cancelled,
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }

    /// Cancellation is a first-class terminal outcome, not a failure, and
    /// is never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TaskError::Cancelled)
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        TaskError::Failed(format!("{err:#}"))
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
