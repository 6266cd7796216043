use thiserror::Error;

use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("task '{0}' not found")]
    NotFound(String),

    /// The request does not fit the task's current status, or checkpoint
    /// write races outlasted the retry budget.
    #[error("{0}")]
    Conflict(String),

    /// The task already reached a terminal status; the update is dropped.
    #[error("task '{task_id}' is already {status}")]
    StaleCallback { task_id: String, status: String },

    /// A callback for a worker the task has no outstanding dispatch to.
    #[error("task '{task_id}' has no pending dispatch to '{worker}'")]
    UnknownDispatch { task_id: String, worker: String },

    #[error("route table points at unregistered node '{0}'")]
    UnknownNode(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            StoreError::Conflict { .. } => EngineError::Conflict(err.to_string()),
            StoreError::InvalidId(_) => EngineError::Invalid(err.to_string()),
            other => EngineError::Store(other),
        }
    }
}
