pub mod json_store;
pub mod memory_store;
pub mod sqlite_store;

use async_trait::async_trait;
use thiserror::Error;

use crate::engine::types::TaskState;

/// Monotonic version stamp of a checkpoint, bumped on every successful save.
pub type Version = u64;

/// A task state together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub state: TaskState,
    pub version: Version,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task '{0}' not found")]
    NotFound(String),

    #[error("task '{0}' already exists")]
    AlreadyExists(String),

    #[error("invalid task id '{0}'")]
    InvalidId(String),

    /// Someone else saved first. Re-read, reapply, retry.
    #[error("checkpoint conflict on task '{task_id}': expected version {expected}, found {actual}")]
    Conflict {
        task_id: String,
        expected: Version,
        actual: Version,
    },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Trait for task checkpoint persistence, keyed by task id.
///
/// `save` is a compare-and-swap on the version stamp: it succeeds only if the
/// stored version still equals `expected`, so concurrent writers on one task
/// can never interleave. Different tasks never contend.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a brand-new task. Fails with `AlreadyExists` for a known id.
    async fn create(&self, state: &TaskState) -> Result<Version, StoreError>;

    /// Latest checkpoint of a task.
    async fn load(&self, task_id: &str) -> Result<Checkpoint, StoreError>;

    /// Replace the checkpoint if it is still at `expected`; returns the new version.
    async fn save(
        &self,
        task_id: &str,
        state: &TaskState,
        expected: Version,
    ) -> Result<Version, StoreError>;

    /// List task states, newest first, optionally filtered by status.
    async fn list(&self, status: Option<&str>) -> Result<Vec<TaskState>, StoreError>;

    /// Delete a task record.
    async fn delete(&self, task_id: &str) -> Result<(), StoreError>;
}
