use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::engine::types::TaskState;
use crate::storage::{Checkpoint, CheckpointStore, StoreError, Version};

/// In-memory checkpoint store. Holds task state only for the lifetime of
/// the store instance; honours the same version contract as durable stores.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    tasks: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn create(&self, state: &TaskState) -> Result<Version, StoreError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&state.task_id) {
            return Err(StoreError::AlreadyExists(state.task_id.clone()));
        }
        tasks.insert(
            state.task_id.clone(),
            Checkpoint {
                state: state.clone(),
                version: 1,
            },
        );
        Ok(1)
    }

    async fn load(&self, task_id: &str) -> Result<Checkpoint, StoreError> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))
    }

    async fn save(
        &self,
        task_id: &str,
        state: &TaskState,
        expected: Version,
    ) -> Result<Version, StoreError> {
        let mut tasks = self.tasks.write().await;
        let current = tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;

        if current.version != expected {
            return Err(StoreError::Conflict {
                task_id: task_id.to_string(),
                expected,
                actual: current.version,
            });
        }

        current.state = state.clone();
        current.version += 1;
        Ok(current.version)
    }

    async fn list(&self, status: Option<&str>) -> Result<Vec<TaskState>, StoreError> {
        let tasks = self.tasks.read().await;
        let mut states: Vec<TaskState> = tasks
            .values()
            .filter(|cp| status.is_none_or(|s| cp.state.status == s))
            .map(|cp| cp.state.clone())
            .collect();
        states.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(states)
    }

    async fn delete(&self, task_id: &str) -> Result<(), StoreError> {
        self.tasks.write().await.remove(task_id);
        Ok(())
    }
}
