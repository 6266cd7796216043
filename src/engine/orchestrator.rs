use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::engine::error::EngineError;
use crate::engine::gateway::{CallbackAck, CallbackGateway, TaskCallback};
use crate::engine::poller::PollScheduler;
use crate::engine::runtime::GraphRuntime;
use crate::engine::types::{DriveReport, RunPhase, TaskState, status};
use crate::workers::DispatchMode;

/// One outstanding dispatch as shown in a status report.
#[derive(Debug, Clone, Serialize)]
pub struct PendingReport {
    pub worker: String,
    pub handle: String,
    pub dispatched_at: DateTime<Utc>,
    pub elapsed_s: f64,
    /// Past the configured dispatch deadline. Informational only.
    pub overdue: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub task_id: String,
    pub correlation_id: String,
    pub status: String,
    pub phase: RunPhase,
    pub trace: Vec<String>,
    pub pending: Vec<PendingReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs_info: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskResult {
    Completed {
        task_id: String,
        status: String,
        result: serde_json::Value,
    },
    NotReady {
        task_id: String,
        status: String,
    },
    Failed {
        task_id: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Compact listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub correlation_id: String,
    pub status: String,
    pub phase: RunPhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&TaskState> for TaskSummary {
    fn from(state: &TaskState) -> Self {
        Self {
            task_id: state.task_id.clone(),
            correlation_id: state.correlation_id.clone(),
            status: state.status.clone(),
            phase: state.phase,
            created_at: state.created_at,
            updated_at: state.updated_at,
        }
    }
}

/// The operations the transport layers (REST, JSON-RPC, CLI) call.
pub struct Orchestrator {
    runtime: Arc<GraphRuntime>,
    gateway: CallbackGateway,
    poller: Option<Arc<PollScheduler>>,
    dispatch_deadline: Option<Duration>,
}

impl Orchestrator {
    pub fn new(runtime: Arc<GraphRuntime>) -> Self {
        Self {
            gateway: CallbackGateway::new(runtime.clone()),
            runtime,
            poller: None,
            dispatch_deadline: None,
        }
    }

    pub fn with_gateway(mut self, gateway: CallbackGateway) -> Self {
        self.gateway = gateway;
        self
    }

    /// Poll-mode tasks are handed to `poller` whenever they halt with
    /// outstanding dispatches.
    pub fn with_poller(mut self, poller: Arc<PollScheduler>) -> Self {
        self.poller = Some(poller);
        self
    }

    pub fn with_dispatch_deadline(mut self, deadline: Duration) -> Self {
        self.dispatch_deadline = Some(deadline);
        self
    }

    pub fn runtime(&self) -> &Arc<GraphRuntime> {
        &self.runtime
    }

    pub fn mode(&self) -> DispatchMode {
        self.runtime.workers().mode()
    }

    pub async fn create_task(
        &self,
        correlation_id: &str,
        payload: serde_json::Value,
    ) -> Result<DriveReport, EngineError> {
        if correlation_id.trim().is_empty() {
            return Err(EngineError::Invalid("correlation_id is required".to_string()));
        }
        if !payload.is_object() {
            return Err(EngineError::Invalid(
                "request payload must be a JSON object".to_string(),
            ));
        }

        let report = self.runtime.start(correlation_id, payload).await?;
        info!(task_id = %report.task_id, status = %report.status, phase = %report.phase, "Task submitted");
        self.after_drive(&report).await;
        Ok(report)
    }

    pub async fn get_status(&self, task_id: &str) -> Result<StatusReport, EngineError> {
        let state = self.runtime.store().load(task_id).await?.state;
        let now = Utc::now();

        let pending = state
            .pending_dispatch
            .iter()
            .map(|(worker, p)| {
                let elapsed_s = (now - p.dispatched_at).num_milliseconds().max(0) as f64 / 1000.0;
                PendingReport {
                    worker: worker.clone(),
                    handle: p.handle.clone(),
                    dispatched_at: p.dispatched_at,
                    elapsed_s,
                    overdue: self
                        .dispatch_deadline
                        .is_some_and(|d| elapsed_s > d.as_secs_f64()),
                }
            })
            .collect();

        Ok(StatusReport {
            task_id: state.task_id,
            correlation_id: state.correlation_id,
            status: state.status,
            phase: state.phase,
            trace: state.trace,
            pending,
            needs_info: state.needs_info,
            created_at: state.created_at,
            updated_at: state.updated_at,
        })
    }

    pub async fn get_result(&self, task_id: &str) -> Result<TaskResult, EngineError> {
        let state = self.runtime.store().load(task_id).await?.state;

        if state.status == status::COMPLETED {
            let result = state
                .results
                .get(&self.runtime.definition().result_worker)
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            return Ok(TaskResult::Completed {
                task_id: state.task_id,
                status: state.status,
                result,
            });
        }

        if state.phase == RunPhase::Terminal || state.status.starts_with("error_") {
            let error = state.last_trace().map(str::to_string);
            return Ok(TaskResult::Failed {
                task_id: state.task_id,
                status: state.status,
                error,
            });
        }

        Ok(TaskResult::NotReady {
            task_id: state.task_id,
            status: state.status,
        })
    }

    pub async fn deliver_callback(&self, callback: TaskCallback) -> Result<CallbackAck, EngineError> {
        let ack = self.gateway.deliver_callback(callback).await?;
        if let CallbackAck::Applied(report) = &ack {
            self.after_drive(report).await;
        }
        Ok(ack)
    }

    pub async fn submit_human_answer(
        &self,
        task_id: &str,
        answer: &str,
    ) -> Result<DriveReport, EngineError> {
        let report = self.gateway.submit_human_answer(task_id, answer).await?;
        self.after_drive(&report).await;
        Ok(report)
    }

    pub async fn list_tasks(&self, status: Option<&str>) -> Result<Vec<TaskSummary>, EngineError> {
        let states = self.runtime.store().list(status).await?;
        Ok(states.iter().map(TaskSummary::from).collect())
    }

    pub async fn delete_task(&self, task_id: &str) -> Result<(), EngineError> {
        self.runtime.store().load(task_id).await?;
        self.runtime.store().delete(task_id).await?;
        info!(task_id = %task_id, "Task deleted");
        Ok(())
    }

    /// Pick up tasks left behind by a previous process. A task still marked
    /// running was cut off mid-drive and is driven again; in poll mode, tasks
    /// with outstanding dispatches are watched again as well.
    pub async fn recover(&self) -> Result<usize, EngineError> {
        let mut recovered = 0;
        for state in self.runtime.store().list(None).await? {
            if state.phase != RunPhase::Running {
                continue;
            }
            match self.runtime.drive(&state.task_id).await {
                Ok(report) => {
                    info!(
                        task_id = %report.task_id,
                        from = %state.status,
                        to = %report.status,
                        "Redrove interrupted run"
                    );
                    self.after_drive(&report).await;
                    recovered += 1;
                }
                Err(e) => warn!(task_id = %state.task_id, error = %e, "Could not redrive task"),
            }
        }

        if let Some(poller) = &self.poller {
            recovered += poller.recover().await?;
        }
        Ok(recovered)
    }

    async fn after_drive(&self, report: &DriveReport) {
        if report.phase != RunPhase::Interrupted {
            return;
        }
        if let Some(poller) = &self.poller
            && let Err(e) = poller.watch(&report.task_id).await
        {
            warn!(task_id = %report.task_id, error = %e, "Could not start polling");
        }
    }
}
