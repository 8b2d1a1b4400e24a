use crate::error::TaskError;

use chrono::{Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Component, Path};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BACKUP_TIMEOUT: Duration = Duration::from_secs(60);
/// Longest backup a task may ask for, one week
pub const MAX_BACKUP_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// One unit of work delivered by the distribution system
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    #[serde(default)]
    pub task_type: String,
    #[serde(default)]
    pub input_data: Map<String, Value>
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Backup,
    Remove
}

impl FromStr for TaskType {
    type Err = TaskError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "backup" => Ok(TaskType::Backup),
            "remove" => Ok(TaskType::Remove),
            unknown => Err(TaskError::UnknownTaskType(String::from(unknown)))
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Completed,
    Failed,
    FailedWithTerminalError
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub output_data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_for_incompletion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    pub end_time: String
}

impl TaskResult {
    pub fn completed<T: Serialize>(task_id: &str, output: &T) -> Result<TaskResult, TaskError> {
        let output_data = serde_json::to_value(output)?;
        Ok(TaskResult {
            task_id: task_id.to_string(),
            status: TaskStatus::Completed,
            output_data,
            reason_for_incompletion: None,
            error_kind: None,
            end_time: now()
        })
    }

    pub fn failed(task_id: &str, error: &TaskError) -> TaskResult {
        TaskResult {
            task_id: task_id.to_string(),
            status: if error.is_terminal() { TaskStatus::FailedWithTerminalError } else { TaskStatus::Failed },
            output_data: Value::Object(Map::new()),
            reason_for_incompletion: Some(error.to_string()),
            error_kind: Some(error.kind()),
            end_time: now()
        }
    }
}

fn now() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRequest {
    pub backup_name: String,
    pub timeout: Duration
}

/// dataSizeMB is an estimate: the apparent size of the source directory,
/// not what the engine actually stored in the repository.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct BackupResult {
    #[serde(rename = "dataId")]
    pub data_id: String,
    #[serde(rename = "dataSizeMB")]
    pub data_size_mb: u64
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveRequest {
    pub backup_name: String, // informational only
    pub data_id: String
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoveResult {}

impl BackupRequest {
    pub fn from_input(input: &Map<String, Value>) -> Result<BackupRequest, TaskError> {
        let backup_name = required_string(input, "backupName")?;
        validate_backup_name(&backup_name)?;

        let timeout = match input.get("timeoutSeconds") {
            None | Some(Value::Null) => DEFAULT_BACKUP_TIMEOUT,
            Some(value) => match value.as_f64() {
                Some(seconds) if seconds > MAX_BACKUP_TIMEOUT.as_secs() as f64 => {
                    warn!("timeoutSeconds {} is too long, using {} seconds", value, MAX_BACKUP_TIMEOUT.as_secs());
                    MAX_BACKUP_TIMEOUT
                },
                Some(seconds) if seconds >= 1.0 => Duration::from_secs(seconds as u64),
                _ => {
                    warn!("Ignoring unusable timeoutSeconds '{}', using {} seconds", value, DEFAULT_BACKUP_TIMEOUT.as_secs());
                    DEFAULT_BACKUP_TIMEOUT
                }
            }
        };

        return Ok(BackupRequest { backup_name, timeout });
    }
}

impl RemoveRequest {
    pub fn from_input(input: &Map<String, Value>) -> Result<RemoveRequest, TaskError> {
        let backup_name = required_string(input, "backupName")?;
        let data_id = required_string(input, "dataId")?;

        if !data_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(TaskError::InvalidField {
                field: "dataId",
                reason: format!("'{}' is not an alphanumeric snapshot id", data_id)
            });
        }

        return Ok(RemoveRequest { backup_name, data_id });
    }
}

fn required_string(input: &Map<String, Value>, field: &'static str) -> Result<String, TaskError> {
    match input.get(field) {
        None | Some(Value::Null) => Err(TaskError::MissingField(field)),
        Some(Value::String(value)) if value.is_empty() => Err(TaskError::MissingField(field)),
        Some(Value::String(value)) => Ok(value.clone()),
        Some(other) => Err(TaskError::InvalidField {
            field,
            reason: format!("expected a string, got {}", other)
        })
    }
}

/// The name selects a subdirectory of the source root and must stay inside of it
fn validate_backup_name(name: &str) -> Result<(), TaskError> {
    let components: Vec<Component> = Path::new(name).components().collect();
    let inside_root = components.iter().all(|component| match component {
        Component::Normal(_) | Component::CurDir => true,
        _ => false
    });
    let names_subdirectory = components.iter().any(|component| matches!(component, Component::Normal(_)));

    if !inside_root || !names_subdirectory {
        return Err(TaskError::InvalidField {
            field: "backupName",
            reason: format!("'{}' does not name a directory below the backup source", name)
        });
    }
    Ok(())
}
