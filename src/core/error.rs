use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("Submission rejected for '{operation}' on '{index}': {message}")]
    Submission {
        operation: String,
        index: String,
        message: String,
    },

    #[error("Failed to read status of task '{task_id}': {message}")]
    Poll { task_id: String, message: String },

    #[error("Task '{task_id}' failed: {reason}")]
    TaskFailure { task_id: String, reason: String },

    #[error("Task '{task_id}' did not complete after {attempts} status checks")]
    PollTimeout { task_id: String, attempts: u32 },

    #[error("Interrupted while waiting for task '{task_id}'")]
    Interrupted { task_id: String },

    #[error("Document '{target_id}' not found")]
    NotFound { target_id: String },

    #[error("Version conflict on '{target_id}'")]
    VersionConflict { target_id: String },

    #[error("Conflict on '{target_id}': {reason}")]
    Conflict { target_id: String, reason: String },

    #[error("Operation '{operation}' failed for '{target_id}': {message}")]
    Runtime {
        operation: String,
        target_id: String,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Script template error: {0}")]
    Template(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

impl ArchiveError {
    /// Wraps a low-level failure into a `Runtime` error carrying the operation
    /// name and target id. Domain conditions pass through untouched.
    pub fn into_runtime(self, operation: &str, target_id: &str) -> Self {
        match self {
            Self::NotFound { .. } | Self::Conflict { .. } | Self::Runtime { .. } => self,
            other => Self::Runtime {
                operation: operation.to_string(),
                target_id: target_id.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Returns `true` for failures the worker should retry on its next tick.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config(_) | Self::Template(_))
    }
}

impl<T> From<std::sync::PoisonError<T>> for ArchiveError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}

impl From<serde_json::Error> for ArchiveError {
    fn from(err: serde_json::Error) -> Self {
        Self::Io(format!("json: {}", err))
    }
}
