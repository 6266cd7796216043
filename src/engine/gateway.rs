use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::error::EngineError;
use crate::engine::runtime::{GraphRuntime, ResumeOutcome};
use crate::engine::types::{DriveReport, ExternalUpdate, WorkerCallback};

/// Asynchronous worker result addressed to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCallback {
    pub task_id: String,
    #[serde(alias = "source")]
    pub worker_name: String,
    pub status: String,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_info: Option<Vec<String>>,
}

impl TaskCallback {
    fn into_parts(self) -> (String, WorkerCallback) {
        (
            self.task_id,
            WorkerCallback {
                worker_name: self.worker_name,
                status: self.status,
                result: self.result,
                needs_info: self.needs_info,
            },
        )
    }
}

/// How a delivered callback was handled. Every variant is an acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "ack", rename_all = "lowercase")]
pub enum CallbackAck {
    /// Merged and the task was driven on.
    Applied(DriveReport),
    /// Already merged earlier; ignored.
    Duplicate { status: String },
    /// The task had already finished; ignored.
    Stale { status: String },
    /// No matching dispatch even after a retry; ignored.
    Dropped { reason: String },
}

/// Entry point for callbacks and human answers.
pub struct CallbackGateway {
    runtime: Arc<GraphRuntime>,
    retry_delay: Duration,
}

impl CallbackGateway {
    pub fn new(runtime: Arc<GraphRuntime>) -> Self {
        Self {
            runtime,
            retry_delay: Duration::from_millis(500),
        }
    }

    /// Delay before the single retry of a callback that beat its dispatch's checkpoint.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub async fn deliver_callback(&self, callback: TaskCallback) -> Result<CallbackAck, EngineError> {
        if callback.worker_name.trim().is_empty() {
            return Err(EngineError::Invalid("worker_name is required".to_string()));
        }

        let (task_id, callback) = callback.into_parts();
        let worker = callback.worker_name.clone();
        let update = ExternalUpdate::WorkerResult(callback);
        let mut retried = false;

        loop {
            match self.runtime.resume(&task_id, &update).await {
                Ok(ResumeOutcome::Resumed(report)) => return Ok(CallbackAck::Applied(report)),
                Ok(ResumeOutcome::Duplicate { status }) => {
                    return Ok(CallbackAck::Duplicate { status });
                }
                Err(EngineError::StaleCallback { status, .. }) => {
                    info!(task_id = %task_id, worker = %worker, status = %status, "Stale callback dropped");
                    return Ok(CallbackAck::Stale { status });
                }
                Err(EngineError::UnknownDispatch { .. }) if !retried => {
                    warn!(
                        task_id = %task_id,
                        worker = %worker,
                        delay_ms = self.retry_delay.as_millis() as u64,
                        "Callback arrived before its dispatch was recorded, retrying once"
                    );
                    retried = true;
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e @ EngineError::UnknownDispatch { .. }) => {
                    warn!(task_id = %task_id, worker = %worker, "Dropping callback: {}", e);
                    return Ok(CallbackAck::Dropped {
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Record a human answer and resume the task. Only valid while the task
    /// is awaiting human input; otherwise a conflict and nothing changes.
    pub async fn submit_human_answer(
        &self,
        task_id: &str,
        answer: &str,
    ) -> Result<DriveReport, EngineError> {
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(EngineError::Invalid("answer must not be empty".to_string()));
        }

        match self
            .runtime
            .resume(task_id, &ExternalUpdate::HumanAnswer(answer.to_string()))
            .await?
        {
            ResumeOutcome::Resumed(report) => Ok(report),
            ResumeOutcome::Duplicate { status } => Err(EngineError::Conflict(format!(
                "task '{}' is {}, not awaiting human input",
                task_id, status
            ))),
        }
    }
}
