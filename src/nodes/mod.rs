pub mod builtin;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::engine::router::WorkflowDefinition;
use crate::engine::types::{StateDelta, TaskState};
use crate::workers::WorkerClient;

/// Trait that all workflow nodes must implement.
///
/// A node performs at most one externally visible side effect and reports
/// what happened as a [`StateDelta`]. Running a node twice on the same state
/// must not dispatch twice.
#[async_trait]
pub trait Node: Send + Sync {
    /// Node name as used in route tables (e.g., "dispatch_weather").
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    async fn execute(&self, state: &TaskState, workers: &WorkerClient) -> Result<StateDelta>;
}

/// Registry of available nodes, keyed by name.
pub struct NodeRegistry {
    nodes: HashMap<String, Arc<dyn Node>>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Create a registry with the built-in nodes for `definition` registered.
    pub fn with_builtins(definition: &WorkflowDefinition) -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry, definition);
        registry
    }

    /// Register a node implementation. Replaces any node of the same name.
    pub fn register(&mut self, node: Arc<dyn Node>) {
        self.nodes.insert(node.name().to_string(), node);
    }

    /// Look up a node by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Node>> {
        self.nodes.get(name).cloned()
    }

    /// List all registered nodes with descriptions.
    pub fn list(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<(&str, &str)> = self
            .nodes
            .values()
            .map(|n| (n.name(), n.description()))
            .collect();
        entries.sort_by_key(|(name, _)| *name);
        entries
    }
}
