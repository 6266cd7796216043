pub mod dispatch_node;
pub mod finish_node;
pub mod human_node;
pub mod resume_node;
pub mod travel;

use std::sync::Arc;

use tracing::warn;

use crate::engine::router::WorkflowDefinition;
use crate::nodes::NodeRegistry;

/// Register the built-in nodes a workflow definition needs.
pub fn register_all(registry: &mut NodeRegistry, definition: &WorkflowDefinition) {
    let mut dispatchers = Vec::new();
    for step in &definition.steps {
        match travel::builder_for(&step.worker) {
            Some(build) => {
                let node = Arc::new(dispatch_node::DispatchNode::new(step.clone(), build));
                registry.register(node.clone());
                dispatchers.push(node);
            }
            None => warn!(worker = %step.worker, "No payload builder for worker; step not registered"),
        }
    }

    registry.register(Arc::new(resume_node::ResumeNode::new(dispatchers)));
    registry.register(Arc::new(human_node::HumanInTheLoopNode));
    registry.register(Arc::new(finish_node::FinishNode));
}
