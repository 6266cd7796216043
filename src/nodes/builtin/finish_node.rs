use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::engine::router::node;
use crate::engine::types::{StateDelta, TaskState, status};
use crate::nodes::Node;
use crate::workers::WorkerClient;

pub struct FinishNode;

#[async_trait]
impl Node for FinishNode {
    fn name(&self) -> &str {
        node::FINISH
    }

    fn description(&self) -> &str {
        "Mark the task as completed"
    }

    async fn execute(&self, state: &TaskState, _workers: &WorkerClient) -> Result<StateDelta> {
        info!(task_id = %state.task_id, correlation_id = %state.correlation_id, "Process completed");
        Ok(StateDelta::to(status::COMPLETED).trace("The process has been successfully completed."))
    }
}
