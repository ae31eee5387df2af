use thiserror::Error;

/// Why a mutation or save was refused. None of these end the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("permission denied: viewers cannot {action}")]
    Permission { action: &'static str },

    #[error("task store is not ready")]
    NotReady,

    #[error("no task ids left above {last}")]
    IdsExhausted { last: i64 },

    #[error("storage write failed for {key}: {reason}")]
    Storage { key: String, reason: String },
}

/// A persisted record that could not be turned into a task collection.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("no record stored")]
    Absent,

    #[error("record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record is not a JSON array")]
    NotArray,

    #[error("record has no free task ids left")]
    IdsExhausted,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("quota exceeded writing {key}: {len} bytes")]
    QuotaExceeded { key: String, len: usize },
}

pub type Result<T> = std::result::Result<T, TaskError>;
