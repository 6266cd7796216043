use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::error::EngineError;
use crate::engine::router::{Route, WorkflowDefinition};
use crate::engine::types::{
    DriveReport, ExternalUpdate, RunPhase, StateDelta, TaskState, WorkerCallback, status,
};
use crate::nodes::NodeRegistry;
use crate::storage::{Checkpoint, CheckpointStore};
use crate::workers::WorkerClient;

/// Bounds on a single drive.
#[derive(Debug, Clone)]
pub struct RuntimeLimits {
    /// Nodes executed per `run`/`resume` before the task is failed with
    /// `error_loop_limit`. Guards against cycles in a defective route table.
    pub max_steps: usize,
    /// Consecutive checkpoint conflicts tolerated before giving up.
    pub max_conflict_retries: usize,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_steps: 32,
            max_conflict_retries: 8,
        }
    }
}

/// Result of [`GraphRuntime::resume`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeOutcome {
    Resumed(DriveReport),
    /// The update was already merged; nothing changed.
    Duplicate { status: String },
}

enum Merge {
    Apply(Box<TaskState>),
    Duplicate,
}

/// Drives tasks through a [`WorkflowDefinition`], persisting every step.
///
/// Every write goes through the checkpoint store's version check, so two
/// drives of the same task can never interleave; the loser re-reads and
/// retries against the winner's state.
pub struct GraphRuntime {
    definition: Arc<WorkflowDefinition>,
    registry: Arc<NodeRegistry>,
    store: Arc<dyn CheckpointStore>,
    workers: Arc<WorkerClient>,
    limits: RuntimeLimits,
}

impl GraphRuntime {
    pub fn new(
        definition: Arc<WorkflowDefinition>,
        registry: Arc<NodeRegistry>,
        store: Arc<dyn CheckpointStore>,
        workers: Arc<WorkerClient>,
    ) -> Self {
        Self {
            definition,
            registry,
            store,
            workers,
            limits: RuntimeLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: RuntimeLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    pub fn workers(&self) -> &Arc<WorkerClient> {
        &self.workers
    }

    /// Check that every node the route table names is registered.
    pub fn validate(&self) -> Result<(), EngineError> {
        for (_, route) in self.definition.routes.entries() {
            if let Route::Node(name) = route
                && self.registry.get(name).is_none()
            {
                return Err(EngineError::UnknownNode(name.clone()));
            }
        }
        Ok(())
    }

    /// Create a task at the workflow's entry status and drive it.
    pub async fn start(
        &self,
        correlation_id: &str,
        payload: serde_json::Value,
    ) -> Result<DriveReport, EngineError> {
        let state = TaskState::new(
            Uuid::new_v4().to_string(),
            correlation_id,
            &self.definition.entry_status,
            payload,
        );
        self.run(state).await
    }

    /// Persist `initial` as a new task, then drive it until it halts.
    pub async fn run(&self, initial: TaskState) -> Result<DriveReport, EngineError> {
        self.store.create(&initial).await?;
        info!(
            task_id = %initial.task_id,
            correlation_id = %initial.correlation_id,
            workflow = %self.definition.name,
            "Task created"
        );
        self.drive(&initial.task_id).await
    }

    /// Merge an external update into the checkpoint, then continue driving.
    pub async fn resume(
        &self,
        task_id: &str,
        update: &ExternalUpdate,
    ) -> Result<ResumeOutcome, EngineError> {
        let mut conflicts = 0;
        loop {
            let Checkpoint { state, version } = self.store.load(task_id).await?;
            let next = match self.merge_update(&state, update)? {
                Merge::Apply(next) => next,
                Merge::Duplicate => {
                    info!(task_id = %task_id, status = %state.status, "Update already merged, ignoring");
                    return Ok(ResumeOutcome::Duplicate {
                        status: state.status,
                    });
                }
            };

            match self.store.save(task_id, &next, version).await {
                Ok(_) => {
                    info!(
                        task_id = %task_id,
                        from = %state.status,
                        to = %next.status,
                        "Merged external update"
                    );
                    break;
                }
                Err(e) if e.is_conflict() => {
                    conflicts += 1;
                    self.check_conflicts(task_id, conflicts)?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let report = self.drive(task_id).await?;
        Ok(ResumeOutcome::Resumed(report))
    }

    /// Execute nodes for the task's current status until the router says
    /// wait or terminal, an interrupt point is reached, or the step cap hits.
    pub async fn drive(&self, task_id: &str) -> Result<DriveReport, EngineError> {
        let mut steps = 0;
        let mut conflicts = 0;

        loop {
            let Checkpoint { state, version } = self.store.load(task_id).await?;

            let node_name = match self.definition.route(&state.status) {
                Route::Node(name) if state.phase != RunPhase::Interrupted => name,
                route => {
                    let phase = match route {
                        Route::Terminal => RunPhase::Terminal,
                        _ => RunPhase::Interrupted,
                    };
                    if state.phase == phase {
                        return Ok(report(&state, steps));
                    }
                    let mut settled = state.clone();
                    settled.phase = phase;
                    match self.store.save(task_id, &settled, version).await {
                        Ok(_) => return Ok(report(&settled, steps)),
                        Err(e) if e.is_conflict() => {
                            conflicts += 1;
                            self.check_conflicts(task_id, conflicts)?;
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            };

            let (delta, executed) = if steps >= self.limits.max_steps {
                warn!(task_id = %task_id, steps, status = %state.status, "Step limit reached");
                (
                    StateDelta::to(status::ERROR_LOOP_LIMIT).trace(format!(
                        "Error: no terminal status after {} steps (stuck at '{}').",
                        steps, state.status
                    )),
                    None,
                )
            } else {
                match self.registry.get(&node_name) {
                    Some(node) => {
                        steps += 1;
                        debug!(task_id = %task_id, node = %node_name, status = %state.status, "Executing node");
                        let delta = match node.execute(&state, &self.workers).await {
                            Ok(delta) => delta,
                            Err(e) => {
                                error!(task_id = %task_id, node = %node_name, error = %e, "Node failed");
                                StateDelta::to(&format!("error_{}", node_name)).trace(format!(
                                    "Error: node '{}' failed. Reason: {:#}",
                                    node_name, e
                                ))
                            }
                        };
                        (delta, Some(node_name))
                    }
                    None => {
                        error!(task_id = %task_id, node = %node_name, "Route points at unknown node");
                        (
                            StateDelta::to(status::ERROR_ROUTING).trace(format!(
                                "Error: status '{}' routes to unknown node '{}'.",
                                state.status, node_name
                            )),
                            None,
                        )
                    }
                }
            };

            let mut next = state.clone();
            next.apply(delta);
            next.phase = self.phase_after(&next.status, executed.as_deref());

            match self.store.save(task_id, &next, version).await {
                Ok(_) => {
                    conflicts = 0;
                    info!(
                        task_id = %task_id,
                        node = executed.as_deref().unwrap_or("-"),
                        from = %state.status,
                        to = %next.status,
                        phase = %next.phase,
                        "Transition"
                    );
                    if next.phase != RunPhase::Running {
                        return Ok(report(&next, steps));
                    }
                }
                Err(e) if e.is_conflict() => {
                    conflicts += 1;
                    self.check_conflicts(task_id, conflicts)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn phase_after(&self, status: &str, executed: Option<&str>) -> RunPhase {
        match self.definition.route(status) {
            Route::Terminal => RunPhase::Terminal,
            Route::Wait => RunPhase::Interrupted,
            Route::Node(_) => match executed {
                Some(node) if self.definition.interrupts_after(node) => RunPhase::Interrupted,
                _ => RunPhase::Running,
            },
        }
    }

    fn check_conflicts(&self, task_id: &str, conflicts: usize) -> Result<(), EngineError> {
        if conflicts > self.limits.max_conflict_retries {
            return Err(EngineError::Conflict(format!(
                "task '{}' kept changing underneath; gave up after {} attempts",
                task_id, conflicts
            )));
        }
        warn!(task_id = %task_id, attempt = conflicts, "Checkpoint conflict, re-reading");
        Ok(())
    }

    fn merge_update(&self, state: &TaskState, update: &ExternalUpdate) -> Result<Merge, EngineError> {
        match update {
            ExternalUpdate::HumanAnswer(answer) => {
                if answer.trim().is_empty() {
                    return Err(EngineError::Invalid("answer must not be empty".to_string()));
                }
                if state.status != status::AWAITING_HUMAN_INPUT {
                    return Err(EngineError::Conflict(format!(
                        "task '{}' is {}, not awaiting human input",
                        state.task_id, state.status
                    )));
                }
                let mut next = state.clone();
                next.apply(
                    StateDelta::to(status::RESUMING)
                        .answered(answer.as_str())
                        .trace(format!("Human input received: {}", answer)),
                );
                next.phase = RunPhase::Running;
                Ok(Merge::Apply(Box::new(next)))
            }
            ExternalUpdate::WorkerResult(callback) => self.merge_callback(state, callback),
        }
    }

    fn merge_callback(&self, state: &TaskState, callback: &WorkerCallback) -> Result<Merge, EngineError> {
        let worker = callback.worker_name.as_str();

        if self.definition.is_terminal(&state.status) {
            return Err(EngineError::StaleCallback {
                task_id: state.task_id.clone(),
                status: state.status.clone(),
            });
        }

        let step = self.definition.step(worker).ok_or_else(|| {
            EngineError::Invalid(format!("workflow has no worker named '{}'", worker))
        })?;

        if !state.pending_dispatch.contains_key(worker) {
            let already_merged = state.results.contains_key(worker)
                || (state.status == status::AWAITING_HUMAN_INPUT
                    && state.hitl_source.as_deref() == Some(worker));
            if already_merged {
                return Ok(Merge::Duplicate);
            }
            return Err(EngineError::UnknownDispatch {
                task_id: state.task_id.clone(),
                worker: worker.to_string(),
            });
        }

        let failure = callback.questions().is_none() && callback.is_failure();
        let mut delta = if let Some(questions) = callback.questions() {
            StateDelta::to(status::AWAITING_HUMAN_INPUT)
                .closed(worker)
                .needs_info(worker, questions.to_vec())
                .trace(format!(
                    "{} needs more information: {}",
                    worker,
                    questions.join(", ")
                ))
        } else if failure {
            StateDelta::to(&step.error_status).closed(worker).trace(format!(
                "Error: {} reported '{}'. Reason: {}",
                worker,
                callback.status,
                failure_reason(&callback.result)
            ))
        } else {
            StateDelta::to(&step.done_status)
                .result(worker, callback.result.clone())
                .trace(format!("Result received from {}.", worker))
        };

        let mut next = state.clone();
        // A human question already on the table outranks automatic routing,
        // but not a failed step: that still ends the task.
        let hold = (state.status == status::AWAITING_HUMAN_INPUT
            || state.status == status::RESUMING)
            && !failure;
        if hold && delta.needs_info.is_none() {
            delta.status = None;
        }
        next.apply(delta);
        if !hold {
            next.phase = RunPhase::Running;
        }
        Ok(Merge::Apply(Box::new(next)))
    }
}

fn report(state: &TaskState, steps: usize) -> DriveReport {
    DriveReport {
        task_id: state.task_id.clone(),
        status: state.status.clone(),
        phase: state.phase,
        steps,
    }
}

fn failure_reason(result: &serde_json::Value) -> String {
    match result {
        serde_json::Value::Null => "no detail".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other
            .get("error")
            .or_else(|| other.get("message"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}
