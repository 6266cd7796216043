use std::str::FromStr;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::engine::types::TaskState;
use crate::storage::{Checkpoint, CheckpointStore, StoreError, Version};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS checkpoints (
    task_id    TEXT PRIMARY KEY,
    version    INTEGER NOT NULL,
    status     TEXT NOT NULL,
    state      TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)";

/// Durable checkpoint store on SQLite.
///
/// Compare-and-swap is a single `UPDATE ... WHERE version = ?`; zero affected
/// rows means the row is gone or someone else won the race.
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Open (and create if missing) the database at `database_url`,
    /// e.g. `sqlite:data/tasks.db` or `sqlite::memory:`.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database url: {}", database_url))?
            .create_if_missing(true);

        // Every connection to `:memory:` is its own database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database: {}", database_url))?;

        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .context("Failed to create checkpoints table")?;

        info!(database_url = %database_url, "Opened SQLite checkpoint store");
        Ok(Self { pool })
    }

    async fn current_version(&self, task_id: &str) -> Result<Option<Version>, StoreError> {
        let row = sqlx::query("SELECT version FROM checkpoints WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read checkpoint version")?;
        match row {
            Some(row) => {
                let version: i64 = row.try_get("version").context("Bad version column")?;
                Ok(Some(version as Version))
            }
            None => Ok(None),
        }
    }
}

/// Fixed-width, so `ORDER BY created_at` sorts chronologically.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_state(raw: &str, task_id: &str) -> Result<TaskState, StoreError> {
    Ok(serde_json::from_str(raw).with_context(|| format!("Failed to parse task: {}", task_id))?)
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn create(&self, state: &TaskState) -> Result<Version, StoreError> {
        let raw = serde_json::to_string(state).context("Failed to serialize task")?;
        let result = sqlx::query(
            "INSERT INTO checkpoints (task_id, version, status, state, created_at, updated_at)
             VALUES (?, 1, ?, ?, ?, ?)",
        )
        .bind(&state.task_id)
        .bind(&state.status)
        .bind(&raw)
        .bind(timestamp(state.created_at))
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(1),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::AlreadyExists(state.task_id.clone()))
            }
            Err(e) => Err(anyhow::Error::new(e)
                .context("Failed to insert checkpoint")
                .into()),
        }
    }

    async fn load(&self, task_id: &str) -> Result<Checkpoint, StoreError> {
        let row = sqlx::query("SELECT version, state FROM checkpoints WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load checkpoint")?
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;

        let version: i64 = row.try_get("version").context("Bad version column")?;
        let raw: String = row.try_get("state").context("Bad state column")?;
        Ok(Checkpoint {
            state: decode_state(&raw, task_id)?,
            version: version as Version,
        })
    }

    async fn save(
        &self,
        task_id: &str,
        state: &TaskState,
        expected: Version,
    ) -> Result<Version, StoreError> {
        let raw = serde_json::to_string(state).context("Failed to serialize task")?;
        let affected = sqlx::query(
            "UPDATE checkpoints
             SET version = version + 1, status = ?, state = ?, updated_at = ?
             WHERE task_id = ? AND version = ?",
        )
        .bind(&state.status)
        .bind(&raw)
        .bind(timestamp(Utc::now()))
        .bind(task_id)
        .bind(expected as i64)
        .execute(&self.pool)
        .await
        .context("Failed to save checkpoint")?
        .rows_affected();

        if affected == 1 {
            return Ok(expected + 1);
        }

        match self.current_version(task_id).await? {
            Some(actual) => Err(StoreError::Conflict {
                task_id: task_id.to_string(),
                expected,
                actual,
            }),
            None => Err(StoreError::NotFound(task_id.to_string())),
        }
    }

    async fn list(&self, status: Option<&str>) -> Result<Vec<TaskState>, StoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT task_id, state FROM checkpoints WHERE status = ? ORDER BY created_at DESC",
                )
                .bind(status)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT task_id, state FROM checkpoints ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .context("Failed to list checkpoints")?;

        rows.iter()
            .map(|row| {
                let task_id: String = row.try_get("task_id").context("Bad task_id column")?;
                let raw: String = row.try_get("state").context("Bad state column")?;
                decode_state(&raw, &task_id)
            })
            .collect()
    }

    async fn delete(&self, task_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM checkpoints WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete checkpoint")?;
        Ok(())
    }
}
