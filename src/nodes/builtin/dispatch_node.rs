use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::engine::router::WorkerStep;
use crate::engine::types::{StateDelta, TaskState, needs_info_in, status};
use crate::nodes::Node;
use crate::nodes::builtin::travel::PayloadBuilder;
use crate::workers::{Outcome, WorkRequest, WorkerClient};

/// Hands one workflow step to its worker.
pub struct DispatchNode {
    step: WorkerStep,
    build: PayloadBuilder,
    description: String,
}

impl DispatchNode {
    pub fn new(step: WorkerStep, build: PayloadBuilder) -> Self {
        let description = format!("Dispatch work to {}", step.worker);
        Self {
            step,
            build,
            description,
        }
    }

    pub fn step(&self) -> &WorkerStep {
        &self.step
    }

    pub fn request(&self, state: &TaskState) -> WorkRequest {
        WorkRequest::new(
            &state.task_id,
            &state.correlation_id,
            &self.step.worker,
            (self.build)(state),
        )
    }
}

#[async_trait]
impl Node for DispatchNode {
    fn name(&self) -> &str {
        &self.step.node
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, state: &TaskState, workers: &WorkerClient) -> Result<StateDelta> {
        let worker = &self.step.worker;

        // Re-entry after a crash: the earlier dispatch already took effect.
        if state.results.contains_key(worker) {
            return Ok(StateDelta::to(&self.step.done_status));
        }
        if state.pending_dispatch.contains_key(worker) {
            return Ok(StateDelta::to(&self.step.dispatched_status));
        }

        let request = self.request(state);
        info!(task_id = %state.task_id, worker = %worker, mode = %workers.mode(), "Dispatching");
        Ok(outcome_delta(&self.step, workers.invoke(&request).await))
    }
}

/// Translate a worker outcome into the step's next status.
pub fn outcome_delta(step: &WorkerStep, outcome: Outcome) -> StateDelta {
    let worker = step.worker.as_str();
    match outcome {
        Outcome::Completed(result) => match needs_info_in(&result) {
            Some(questions) => StateDelta::to(status::AWAITING_HUMAN_INPUT)
                .trace(format!(
                    "{} needs more information: {}",
                    worker,
                    questions.join(", ")
                ))
                .needs_info(worker, questions),
            None => StateDelta::to(&step.done_status)
                .result(worker, result)
                .trace(format!("{} completed its task.", worker)),
        },
        Outcome::Dispatched(handle) => StateDelta::to(&step.dispatched_status)
            .trace(format!(
                "Task has been dispatched to {}. Awaiting result.",
                worker
            ))
            .dispatched(worker, handle),
        Outcome::Failed(err) => StateDelta::to(&step.error_status).trace(format!(
            "Error: Failed to dispatch task to {}. Reason: {}",
            worker, err
        )),
    }
}
