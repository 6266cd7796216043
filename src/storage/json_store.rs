use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::engine::types::TaskState;
use crate::storage::{Checkpoint, CheckpointStore, StoreError, Version};

#[derive(Serialize, Deserialize)]
struct CheckpointRecord {
    version: Version,
    state: TaskState,
}

const MAX_ID_LEN: usize = 128;

/// File-based JSON checkpoint store. Each task is stored as a separate JSON
/// file; writes go through a temp file and an atomic rename.
pub struct JsonCheckpointStore {
    base_dir: PathBuf,
    /// One lock per task id, so unrelated tasks never wait on each other.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JsonCheckpointStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Ids become file names, so only plain tokens are accepted.
    fn task_path(&self, task_id: &str) -> Result<PathBuf, StoreError> {
        let plain = !task_id.is_empty()
            && task_id.len() <= MAX_ID_LEN
            && task_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !plain {
            return Err(StoreError::InvalidId(task_id.to_string()));
        }
        Ok(self.base_dir.join(format!("{}.json", task_id)))
    }

    /// Number of per-task locks currently held in the map.
    pub async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Run `op` on the task's file while holding that task's lock. The map
    /// entry is dropped again once no other caller is waiting on it.
    async fn with_key_lock<T, F, Fut>(&self, task_id: &str, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let path = self.task_path(task_id)?;
        let lock = self
            .locks
            .lock()
            .await
            .entry(task_id.to_string())
            .or_default()
            .clone();

        let result = {
            let _guard = lock.lock().await;
            op(path).await
        };

        let mut locks = self.locks.lock().await;
        // Clones are only handed out under the map lock: the map's copy plus
        // ours means nobody else holds or waits on it.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(task_id);
        }
        result
    }

    async fn read_record(&self, path: &Path, task_id: &str) -> Result<CheckpointRecord, StoreError> {
        let data = match tokio::fs::read_to_string(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(task_id.to_string()));
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("Failed to read task file: {}", path.display()))
                    .into());
            }
        };
        let record = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse task: {}", task_id))?;
        Ok(record)
    }

    async fn write_record(&self, path: &Path, record: &CheckpointRecord) -> Result<(), StoreError> {
        let tmp_path = path.with_extension("json.tmp");

        let data = serde_json::to_string_pretty(record).context("Failed to serialize task")?;
        tokio::fs::write(&tmp_path, &data)
            .await
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .with_context(|| format!("Failed to move {} into place", path.display()))?;

        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for JsonCheckpointStore {
    async fn create(&self, state: &TaskState) -> Result<Version, StoreError> {
        self.with_key_lock(&state.task_id, |path| async move {
            tokio::fs::create_dir_all(&self.base_dir)
                .await
                .with_context(|| format!("Failed to create {}", self.base_dir.display()))?;

            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Err(StoreError::AlreadyExists(state.task_id.clone()));
            }

            let record = CheckpointRecord {
                version: 1,
                state: state.clone(),
            };
            self.write_record(&path, &record).await?;
            Ok::<_, StoreError>(record.version)
        })
        .await
    }

    async fn load(&self, task_id: &str) -> Result<Checkpoint, StoreError> {
        self.with_key_lock(task_id, |path| async move {
            let record = self.read_record(&path, task_id).await?;
            Ok::<_, StoreError>(Checkpoint {
                state: record.state,
                version: record.version,
            })
        })
        .await
    }

    async fn save(
        &self,
        task_id: &str,
        state: &TaskState,
        expected: Version,
    ) -> Result<Version, StoreError> {
        self.with_key_lock(task_id, |path| async move {
            let current = self.read_record(&path, task_id).await?;
            if current.version != expected {
                return Err(StoreError::Conflict {
                    task_id: task_id.to_string(),
                    expected,
                    actual: current.version,
                });
            }

            let record = CheckpointRecord {
                version: expected + 1,
                state: state.clone(),
            };
            self.write_record(&path, &record).await?;
            Ok::<_, StoreError>(record.version)
        })
        .await
    }

    async fn list(&self, status: Option<&str>) -> Result<Vec<TaskState>, StoreError> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut states = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_dir)
            .await
            .with_context(|| format!("Failed to list {}", self.base_dir.display()))?;

        while let Some(entry) = entries.next_entry().await.context("Failed to read dir entry")? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json")
                && let Ok(data) = tokio::fs::read_to_string(&path).await
                && let Ok(record) = serde_json::from_str::<CheckpointRecord>(&data)
            {
                if let Some(filter) = status
                    && record.state.status != filter
                {
                    continue;
                }
                states.push(record.state);
            }
        }

        // Sort by creation time, newest first
        states.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(states)
    }

    async fn delete(&self, task_id: &str) -> Result<(), StoreError> {
        self.with_key_lock(task_id, |path| async move {
            if path.exists() {
                tokio::fs::remove_file(&path)
                    .await
                    .with_context(|| format!("Failed to delete {}", path.display()))?;
            }
            Ok::<_, StoreError>(())
        })
        .await
    }
}
