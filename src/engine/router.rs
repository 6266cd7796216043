use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::engine::types::status;
use crate::workers::DispatchMode;

/// Where a status leads next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "node", rename_all = "lowercase")]
pub enum Route {
    /// Execute the named node.
    Node(String),
    /// Halt until an external update arrives.
    Wait,
    /// The workflow is finished.
    Terminal,
}

/// Table-driven `status -> next` mapping.
///
/// Statuses missing from the table route to [`Route::Terminal`], so a
/// defective or outdated table can never loop on an unrecognized state.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: BTreeMap<String, Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, status: &str, node: &str) -> Self {
        self.routes
            .insert(status.to_string(), Route::Node(node.to_string()));
        self
    }

    pub fn wait_on(mut self, status: &str) -> Self {
        self.routes.insert(status.to_string(), Route::Wait);
        self
    }

    pub fn route(&self, status: &str) -> Route {
        self.routes.get(status).cloned().unwrap_or(Route::Terminal)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Route)> {
        self.routes.iter().map(|(status, route)| (status.as_str(), route))
    }
}

/// One worker-backed step of a workflow and the statuses it moves between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStep {
    pub worker: String,
    pub node: String,
    pub dispatched_status: String,
    pub done_status: String,
    pub error_status: String,
}

impl WorkerStep {
    pub fn new(worker: &str, node: &str, dispatched: &str, done: &str, error: &str) -> Self {
        Self {
            worker: worker.to_string(),
            node: node.to_string(),
            dispatched_status: dispatched.to_string(),
            done_status: done.to_string(),
            error_status: error.to_string(),
        }
    }
}

/// Node names of the built-in travel workflow.
pub mod node {
    pub const DISPATCH_WEATHER: &str = "dispatch_weather";
    pub const DISPATCH_TRANSPORT: &str = "dispatch_transport";
    pub const DISPATCH_SUMMARY: &str = "dispatch_summary";
    pub const HUMAN_IN_THE_LOOP: &str = "human_in_the_loop";
    pub const RESUME: &str = "resume";
    pub const FINISH: &str = "finish";
}

/// Worker names of the built-in travel workflow.
pub mod worker {
    pub const WEATHER: &str = "agent_a";
    pub const TRANSPORT: &str = "agent_b";
    pub const SUMMARY: &str = "summary";
}

/// A complete workflow variant: routes, interrupt points and worker steps.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub name: String,
    pub entry_status: String,
    pub routes: RouteTable,
    pub interrupt_after: HashSet<String>,
    pub steps: Vec<WorkerStep>,
    /// Worker whose result is the task's final result.
    pub result_worker: String,
}

impl WorkflowDefinition {
    /// Weather → transport → summary, with human-in-the-loop pause/resume.
    ///
    /// Async modes interrupt after every dispatch node so the execution unit
    /// is released while the worker runs.
    pub fn travel(mode: DispatchMode) -> Self {
        let steps = vec![
            WorkerStep::new(
                worker::WEATHER,
                node::DISPATCH_WEATHER,
                status::DISPATCHED_A,
                status::STEP_A_DONE,
                status::ERROR_A,
            ),
            WorkerStep::new(
                worker::TRANSPORT,
                node::DISPATCH_TRANSPORT,
                status::DISPATCHED_B,
                status::STEP_B_DONE,
                status::ERROR_B,
            ),
            WorkerStep::new(
                worker::SUMMARY,
                node::DISPATCH_SUMMARY,
                status::SUMMARIZING,
                status::SUMMARY_DONE,
                status::ERROR_SUMMARY,
            ),
        ];

        let routes = RouteTable::new()
            .on(status::NEW, node::DISPATCH_WEATHER)
            .wait_on(status::DISPATCHED_A)
            .on(status::STEP_A_DONE, node::DISPATCH_TRANSPORT)
            .wait_on(status::DISPATCHED_B)
            .on(status::STEP_B_DONE, node::DISPATCH_SUMMARY)
            .wait_on(status::SUMMARIZING)
            .on(status::SUMMARY_DONE, node::FINISH)
            .on(status::AWAITING_HUMAN_INPUT, node::HUMAN_IN_THE_LOOP)
            .on(status::RESUMING, node::RESUME);

        let mut interrupt_after = HashSet::from([node::HUMAN_IN_THE_LOOP.to_string()]);
        if mode.is_async() {
            interrupt_after.extend(steps.iter().map(|s| s.node.clone()));
            interrupt_after.insert(node::RESUME.to_string());
        }

        Self {
            name: format!("travel-{}", mode),
            entry_status: status::NEW.to_string(),
            routes,
            interrupt_after,
            steps,
            result_worker: worker::SUMMARY.to_string(),
        }
    }

    pub fn route(&self, status: &str) -> Route {
        self.routes.route(status)
    }

    pub fn is_terminal(&self, status: &str) -> bool {
        self.route(status) == Route::Terminal
    }

    pub fn interrupts_after(&self, node: &str) -> bool {
        self.interrupt_after.contains(node)
    }

    pub fn step(&self, worker: &str) -> Option<&WorkerStep> {
        self.steps.iter().find(|s| s.worker == worker)
    }
}
