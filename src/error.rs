use thiserror::Error;

use crate::core::{TaskId, TaskStatus};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Duplicate task id: {0}")]
    DuplicateTask(TaskId),

    #[error("Task {task_id} depends on unknown task {dependency}")]
    UnknownDependency { task_id: TaskId, dependency: TaskId },

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Dependency cycle detected: {}", format_ids(.task_ids))]
    CycleDetected { task_ids: Vec<TaskId> },

    #[error("Illegal transition for task {task_id}: {from} -> {to}")]
    IllegalTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("No executor registered for assignee '{assignee}' (task {task_id})")]
    UnresolvedAssignee { task_id: TaskId, assignee: String },

    #[error("External progress sink unavailable: {0}")]
    ExternalSinkUnavailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;

fn format_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}
