use std::path::PathBuf;

use thiserror::Error;

use crate::model::PlanStatus;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("inventory error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("plan {0} not found")]
    PlanNotFound(i64),

    #[error("plan {id} is not pending (status: {status})")]
    PlanNotPending { id: i64, status: PlanStatus },

    #[error("conflict {0} not found")]
    ConflictNotFound(i64),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("source file does not exist: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result of a batch call that may stop partway: the work already done is kept
/// alongside the error that halted it.
#[derive(Debug)]
pub struct Outcome<T> {
    pub value: T,
    pub error: Option<EngineError>,
}

impl<T> Outcome<T> {
    pub fn complete(value: T) -> Self {
        Self { value, error: None }
    }

    pub fn partial(value: T, error: EngineError) -> Self {
        Self {
            value,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> Result<T> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.value),
        }
    }
}
