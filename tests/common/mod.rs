//! Shared fixtures: a scripted worker transport and runtime builders.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use taskrelay::engine::router::WorkflowDefinition;
use taskrelay::engine::{CallbackGateway, GraphRuntime, Orchestrator};
use taskrelay::nodes::NodeRegistry;
use taskrelay::storage::CheckpointStore;
use taskrelay::storage::memory_store::MemoryCheckpointStore;
use taskrelay::workers::{
    ChannelEventBus, DispatchError, DispatchEvent, DispatchMode, FetchedResult, RemoteStatus,
    RetryPolicy, WorkRequest, WorkerClient, WorkerTransport,
};

/// In-process stand-in for the worker agents.
///
/// Replies are queued per worker; once a queue runs dry the worker answers
/// with a canned travel result built from the request payload.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<HashMap<String, VecDeque<Result<Value, DispatchError>>>>,
    statuses: Mutex<HashMap<String, VecDeque<RemoteStatus>>>,
    requests: Mutex<Vec<WorkRequest>>,
    submitted: Mutex<HashMap<String, Value>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, worker: &str, reply: Result<Value, DispatchError>) {
        self.replies
            .lock()
            .unwrap()
            .entry(worker.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn status(&self, worker: &str, status: RemoteStatus) {
        self.statuses
            .lock()
            .unwrap()
            .entry(worker.to_string())
            .or_default()
            .push_back(status);
    }

    pub fn requests(&self) -> Vec<WorkRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, worker: &str) -> Vec<WorkRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.worker == worker)
            .collect()
    }

    fn next_reply(&self, worker: &str, payload: &Value) -> Result<Value, DispatchError> {
        let scripted = self
            .replies
            .lock()
            .unwrap()
            .get_mut(worker)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| Ok(canned_result(worker, payload)))
    }
}

#[async_trait]
impl WorkerTransport for ScriptedTransport {
    async fn compute(&self, request: &WorkRequest) -> Result<Value, DispatchError> {
        self.requests.lock().unwrap().push(request.clone());
        self.next_reply(&request.worker, &request.payload)
    }

    async fn submit(&self, request: &WorkRequest) -> Result<String, DispatchError> {
        let handle = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            format!("h-{}-{}", request.worker, requests.len())
        };
        self.submitted
            .lock()
            .unwrap()
            .insert(handle.clone(), request.payload.clone());
        Ok(handle)
    }

    async fn poll_status(&self, worker: &str, _handle: &str) -> Result<RemoteStatus, DispatchError> {
        let next = self
            .statuses
            .lock()
            .unwrap()
            .get_mut(worker)
            .and_then(VecDeque::pop_front);
        Ok(next.unwrap_or(RemoteStatus::Done))
    }

    async fn fetch_result(&self, worker: &str, handle: &str) -> Result<FetchedResult, DispatchError> {
        let payload = self
            .submitted
            .lock()
            .unwrap()
            .get(handle)
            .cloned()
            .unwrap_or(Value::Null);
        self.next_reply(worker, &payload).map(FetchedResult::Ready)
    }
}

/// What the travel workers answer when nothing else was scripted.
pub fn canned_result(worker: &str, payload: &Value) -> Value {
    match worker {
        "agent_a" => json!({
            "city": payload["city"],
            "date": payload["date"],
            "report": "Sunny, 28°C, light breeze",
        }),
        "agent_b" => json!({
            "destination": payload["destination"],
            "plans": [
                { "mode": "HSR", "depart": "07:30", "arrive": payload["arrival_time"] },
                { "mode": "bus", "depart": "05:45", "arrive": payload["arrival_time"] },
            ],
        }),
        "summary" => json!({
            "summary": format!(
                "Trip to {}: sunny weather, take the HSR.",
                payload["user_requirement"]["destination"].as_str().unwrap_or("?")
            ),
        }),
        other => json!({ "worker": other }),
    }
}

/// A request that routes a traveller to Taipei.
pub fn trip() -> Value {
    json!({
        "origin": "新竹",
        "destination": "台北",
        "travel_date": "2025-06-01",
        "desired_arrival_time": "09:30",
    })
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        backoff_s: 0.0,
    }
}

pub fn memory_store() -> Arc<dyn CheckpointStore> {
    Arc::new(MemoryCheckpointStore::new())
}

pub fn runtime(
    definition: WorkflowDefinition,
    workers: WorkerClient,
    store: Arc<dyn CheckpointStore>,
) -> Arc<GraphRuntime> {
    let definition = Arc::new(definition);
    let registry = Arc::new(NodeRegistry::with_builtins(&definition));
    Arc::new(GraphRuntime::new(definition, registry, store, Arc::new(workers)))
}

/// Direct-mode runtime backed by `transport`.
pub fn direct_runtime(transport: Arc<ScriptedTransport>) -> Arc<GraphRuntime> {
    runtime(
        WorkflowDefinition::travel(DispatchMode::Direct),
        WorkerClient::direct(transport, fast_retry()),
        memory_store(),
    )
}

/// Event-mode runtime publishing to an in-process channel.
pub fn event_runtime() -> (Arc<GraphRuntime>, mpsc::Receiver<DispatchEvent>) {
    let (bus, rx) = ChannelEventBus::new(64);
    let runtime = runtime(
        WorkflowDefinition::travel(DispatchMode::Event),
        WorkerClient::event(Arc::new(bus), fast_retry()),
        memory_store(),
    );
    (runtime, rx)
}

pub fn event_orchestrator() -> (Orchestrator, mpsc::Receiver<DispatchEvent>) {
    let (runtime, rx) = event_runtime();
    let orchestrator = Orchestrator::new(runtime.clone())
        .with_gateway(CallbackGateway::new(runtime).with_retry_delay(Duration::from_millis(10)));
    (orchestrator, rx)
}
