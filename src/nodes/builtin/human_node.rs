use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::engine::router::node;
use crate::engine::types::{StateDelta, TaskState};
use crate::nodes::Node;
use crate::workers::WorkerClient;

/// Marks the pause for human input. The status stays `awaiting_human_input`;
/// the runtime interrupts after this node.
pub struct HumanInTheLoopNode;

#[async_trait]
impl Node for HumanInTheLoopNode {
    fn name(&self) -> &str {
        node::HUMAN_IN_THE_LOOP
    }

    fn description(&self) -> &str {
        "Pause the task until a human answers the outstanding questions"
    }

    async fn execute(&self, state: &TaskState, _workers: &WorkerClient) -> Result<StateDelta> {
        let questions = state
            .needs_info
            .as_ref()
            .map(|q| q.join(", "))
            .unwrap_or_default();
        info!(task_id = %state.task_id, questions = %questions, "Process requires human input");

        Ok(StateDelta::default().trace(format!(
            "Awaiting human input for the following: {}",
            questions
        )))
    }
}
