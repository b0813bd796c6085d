use crate::queue::task::TaskId;
use thiserror::Error;

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

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Dependency not found: {0}")]
    DependencyNotFound(TaskId),

    #[error("Dependency cycle detected: {}", format_cycle(.path))]
    CycleDetected { path: Vec<TaskId> },

    #[error("Cannot {op} task in {status} state")]
    InvalidStateTransition { op: String, status: String },
}

fn format_cycle(path: &[TaskId]) -> String {
    path.iter()
        .map(|id| id.short())
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub type Result<T> = std::result::Result<T, Error>;
