use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status symbols used by the built-in travel workflow.
pub mod status {
    pub const NEW: &str = "new";
    pub const DISPATCHED_A: &str = "dispatched_a";
    pub const STEP_A_DONE: &str = "step_a_done";
    pub const ERROR_A: &str = "error_a";
    pub const DISPATCHED_B: &str = "dispatched_b";
    pub const STEP_B_DONE: &str = "step_b_done";
    pub const ERROR_B: &str = "error_b";
    pub const SUMMARIZING: &str = "summarizing";
    pub const SUMMARY_DONE: &str = "summary_done";
    pub const ERROR_SUMMARY: &str = "error_summary";
    pub const AWAITING_HUMAN_INPUT: &str = "awaiting_human_input";
    pub const RESUMING: &str = "resuming";
    pub const COMPLETED: &str = "completed";
    pub const ERROR_LOOP_LIMIT: &str = "error_loop_limit";
    pub const ERROR_ROUTING: &str = "error_routing";
    pub const ERROR_RESUME: &str = "error_resume";
}

/// Meta-state of a task, layered on top of its workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Running,
    Interrupted,
    Terminal,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Running => write!(f, "running"),
            RunPhase::Interrupted => write!(f, "interrupted"),
            RunPhase::Terminal => write!(f, "terminal"),
        }
    }
}

/// An outstanding asynchronous dispatch to one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDispatch {
    pub handle: String,
    pub dispatched_at: DateTime<Utc>,
}

impl PendingDispatch {
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            dispatched_at: Utc::now(),
        }
    }
}

/// The persisted truth for one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub correlation_id: String,
    pub status: String,
    pub phase: RunPhase,
    /// Append-only progress messages.
    #[serde(default)]
    pub trace: Vec<String>,
    pub request_payload: serde_json::Value,
    #[serde(default)]
    pub pending_dispatch: BTreeMap<String, PendingDispatch>,
    #[serde(default)]
    pub results: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_info: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_answer: Option<String>,
    /// Worker whose reply asked for human input; re-dispatched on resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hitl_source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskState {
    pub fn new(
        task_id: impl Into<String>,
        correlation_id: impl Into<String>,
        entry_status: &str,
        request_payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            correlation_id: correlation_id.into(),
            status: entry_status.to_string(),
            phase: RunPhase::Running,
            trace: Vec::new(),
            request_payload,
            pending_dispatch: BTreeMap::new(),
            results: BTreeMap::new(),
            needs_info: None,
            human_answer: None,
            hitl_source: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fold a node or gateway delta into this state.
    ///
    /// `results` entries are written at most once per worker, and a pending
    /// dispatch is only dropped once its result landed or it was closed.
    pub fn apply(&mut self, delta: StateDelta) {
        if let Some(status) = delta.status {
            self.status = status;
        }
        self.trace.extend(delta.trace);

        for (worker, result) in delta.results {
            self.pending_dispatch.remove(&worker);
            self.results.entry(worker).or_insert(result);
        }
        for worker in delta.closed {
            self.pending_dispatch.remove(&worker);
        }
        for (worker, pending) in delta.dispatched {
            self.pending_dispatch.entry(worker).or_insert(pending);
        }

        if delta.clear_hitl {
            self.needs_info = None;
            self.human_answer = None;
            self.hitl_source = None;
        }
        if let Some(needs_info) = delta.needs_info {
            self.needs_info = Some(needs_info);
            self.hitl_source = delta.hitl_source;
        }
        if let Some(answer) = delta.human_answer {
            self.human_answer = Some(answer);
        }

        self.updated_at = Utc::now();
    }

    /// Trace line most likely to explain an `error_*` status.
    pub fn last_trace(&self) -> Option<&str> {
        self.trace.last().map(String::as_str)
    }
}

/// Partial update returned by a node (or built by the gateway).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDelta {
    pub status: Option<String>,
    pub trace: Vec<String>,
    pub results: BTreeMap<String, serde_json::Value>,
    pub dispatched: BTreeMap<String, PendingDispatch>,
    /// Pending dispatches concluded without a result (failed, or answered with a question).
    pub closed: Vec<String>,
    pub needs_info: Option<Vec<String>>,
    pub hitl_source: Option<String>,
    pub human_answer: Option<String>,
    pub clear_hitl: bool,
}

impl StateDelta {
    pub fn to(status: &str) -> Self {
        Self {
            status: Some(status.to_string()),
            ..Self::default()
        }
    }

    pub fn trace(mut self, message: impl Into<String>) -> Self {
        self.trace.push(message.into());
        self
    }

    pub fn result(mut self, worker: &str, result: serde_json::Value) -> Self {
        self.results.insert(worker.to_string(), result);
        self
    }

    pub fn dispatched(mut self, worker: &str, handle: impl Into<String>) -> Self {
        self.dispatched
            .insert(worker.to_string(), PendingDispatch::new(handle));
        self
    }

    pub fn closed(mut self, worker: &str) -> Self {
        self.closed.push(worker.to_string());
        self
    }

    pub fn needs_info(mut self, worker: &str, questions: Vec<String>) -> Self {
        self.needs_info = Some(questions);
        self.hitl_source = Some(worker.to_string());
        self
    }

    pub fn answered(mut self, answer: impl Into<String>) -> Self {
        self.human_answer = Some(answer.into());
        self
    }

    pub fn clear_hitl(mut self) -> Self {
        self.clear_hitl = true;
        self
    }
}

/// Asynchronous result delivered by a worker, either through the callback
/// endpoint (event mode) or by the poll scheduler (poll mode).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerCallback {
    #[serde(alias = "source")]
    pub worker_name: String,
    pub status: String,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_info: Option<Vec<String>>,
}

impl WorkerCallback {
    /// `failed`, `error` and `error_*` mark the dispatch as failed.
    pub fn is_failure(&self) -> bool {
        let status = self.status.trim().to_ascii_lowercase();
        status == "failed" || status == "error" || status.starts_with("error_")
    }

    /// Questions for a human, if the worker asked any.
    pub fn questions(&self) -> Option<&[String]> {
        self.needs_info
            .as_deref()
            .filter(|questions| !questions.is_empty())
    }
}

/// Questions carried in a worker result under `needs_info`, if any.
pub fn needs_info_in(result: &serde_json::Value) -> Option<Vec<String>> {
    let questions: Vec<String> = result
        .get("needs_info")?
        .as_array()?
        .iter()
        .filter_map(|q| q.as_str().map(str::to_string))
        .collect();
    (!questions.is_empty()).then_some(questions)
}

/// Out-of-band input merged into a checkpoint by `GraphRuntime::resume`.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalUpdate {
    WorkerResult(WorkerCallback),
    HumanAnswer(String),
}

/// Outcome of one `run`/`resume` drive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriveReport {
    pub task_id: String,
    pub status: String,
    pub phase: RunPhase,
    /// Nodes executed during this drive.
    pub steps: usize,
}
