use crate::util::command::CommandError;

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Maximum amount of engine output carried into a task failure message
const MAX_DIAGNOSTIC_LEN: usize = 2048;

/// Failure of a single backup or remove task.
///
/// Every variant is reported to the distribution system as a failed task with
/// [`TaskError::kind`] and the display text as reason. None of them is retried
/// by the worker itself.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("'{0}' is required as input data")]
    MissingField(&'static str),

    #[error("'{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Unknown task type '{0}'")]
    UnknownTaskType(String),

    #[error("Source backup dir '{}' doesn't exist", .0.display())]
    SourceNotFound(PathBuf),

    #[error("{command} failed ({status}): {}", diagnostic(.output))]
    EngineExecution { command: String, status: String, output: String },

    #[error("{command} did not finish within {} seconds and was terminated", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    #[error("No {operation} confirmation in engine output: {}", diagnostic(.output))]
    ResultNotFound { operation: &'static str, output: String },

    #[error("Returned id from forget is different from requested ({removed} != {requested})")]
    IdentifierMismatch { requested: String, removed: String },

    #[error("Could not encode task output ({0})")]
    OutputEncoding(#[from] serde_json::Error),
}

impl TaskError {
    /// Stable name of the error class, reported next to the message
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::MissingField(_) => "MissingField",
            TaskError::InvalidField { .. } => "InvalidField",
            TaskError::UnknownTaskType(_) => "UnknownTaskType",
            TaskError::SourceNotFound(_) => "SourceNotFound",
            TaskError::EngineExecution { .. } => "EngineExecutionError",
            TaskError::Timeout { .. } => "TimeoutError",
            TaskError::ResultNotFound { .. } => "ResultNotFound",
            TaskError::IdentifierMismatch { .. } => "IdentifierMismatch",
            TaskError::OutputEncoding(_) => "OutputEncoding",
        }
    }

    /// Whether another delivery of the same task can not change the outcome.
    ///
    /// Source directories may appear later and the engine may recover from
    /// transient failures, so only those stay retryable for the distribution system.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskError::SourceNotFound(_)
            | TaskError::EngineExecution { .. }
            | TaskError::Timeout { .. })
    }
}

impl From<CommandError> for TaskError {
    fn from(error: CommandError) -> Self {
        match error {
            CommandError::Timeout { command, timeout } => TaskError::Timeout { command, timeout },
            CommandError::Exit { command, status, outcome } => TaskError::EngineExecution {
                command,
                status: status.to_string(),
                output: outcome.combined(),
            },
            other => {
                let status = String::from("not started");
                let output = other.to_string();
                TaskError::EngineExecution { command: other.command().to_string(), status, output }
            }
        }
    }
}

fn diagnostic(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.len() <= MAX_DIAGNOSTIC_LEN {
        return trimmed.to_string();
    }

    // keep the tail, engines print the reason for failing last
    let mut start = trimmed.len() - MAX_DIAGNOSTIC_LEN;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}
