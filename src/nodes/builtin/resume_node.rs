use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::engine::router::node;
use crate::engine::types::{StateDelta, TaskState, status};
use crate::nodes::Node;
use crate::nodes::builtin::dispatch_node::{DispatchNode, outcome_delta};
use crate::workers::WorkerClient;

/// Re-dispatches the worker that asked a question, with the human's answer
/// attached to its request.
pub struct ResumeNode {
    dispatchers: HashMap<String, Arc<DispatchNode>>,
}

impl ResumeNode {
    pub fn new(dispatchers: impl IntoIterator<Item = Arc<DispatchNode>>) -> Self {
        Self {
            dispatchers: dispatchers
                .into_iter()
                .map(|d| (d.step().worker.clone(), d))
                .collect(),
        }
    }
}

#[async_trait]
impl Node for ResumeNode {
    fn name(&self) -> &str {
        node::RESUME
    }

    fn description(&self) -> &str {
        "Resume the paused step with the human's answer"
    }

    async fn execute(&self, state: &TaskState, workers: &WorkerClient) -> Result<StateDelta> {
        let Some(source) = state.hitl_source.as_deref() else {
            warn!(task_id = %state.task_id, "Resume without a worker to resume");
            return Ok(StateDelta::to(status::ERROR_RESUME)
                .trace("Error: nothing to resume; no worker asked for input."));
        };
        let Some(dispatch) = self.dispatchers.get(source) else {
            return Ok(StateDelta::to(status::ERROR_RESUME).trace(format!(
                "Error: cannot resume unknown worker '{}'.",
                source
            )));
        };
        let step = dispatch.step();

        if state.pending_dispatch.contains_key(source) {
            return Ok(StateDelta::to(&step.dispatched_status).clear_hitl());
        }

        let mut request = dispatch.request(state);
        if let Some(body) = request.payload.as_object_mut() {
            body.insert(
                "human_answer".to_string(),
                serde_json::json!(state.human_answer),
            );
            body.insert("answered".to_string(), serde_json::json!(state.needs_info));
        }
        // Distinct from the first dispatch, stable across retries of this state.
        request.idempotency_key = format!("{}:answer-{}", request.idempotency_key, state.trace.len());

        info!(task_id = %state.task_id, worker = %source, "Resuming with human answer");
        Ok(outcome_delta(step, workers.invoke(&request).await).clear_hitl())
    }
}
