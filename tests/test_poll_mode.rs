//! Poll mode: submit, background polling, result fetch, restart recovery.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use taskrelay::engine::router::{WorkflowDefinition, worker};
use taskrelay::engine::types::{RunPhase, StateDelta, TaskState, status};
use taskrelay::engine::{GraphRuntime, Orchestrator, PollScheduler, TaskResult};
use taskrelay::storage::CheckpointStore;
use taskrelay::workers::{DispatchError, DispatchMode, RemoteStatus, WorkerClient};

use common::{ScriptedTransport, fast_retry, memory_store, runtime, trip};

fn poll_runtime(transport: Arc<ScriptedTransport>, store: Arc<dyn CheckpointStore>) -> Arc<GraphRuntime> {
    runtime(
        WorkflowDefinition::travel(DispatchMode::Poll),
        WorkerClient::poll(transport, fast_retry()),
        store,
    )
}

fn orchestrator(runtime: Arc<GraphRuntime>) -> (Orchestrator, Arc<PollScheduler>) {
    let poller = Arc::new(PollScheduler::new(
        runtime.clone(),
        Duration::from_millis(10),
        4,
    ));
    (Orchestrator::new(runtime).with_poller(poller.clone()), poller)
}

/// Wait until the task reaches `wanted`, or fail after a few seconds.
async fn wait_for_status(orchestrator: &Orchestrator, task_id: &str, wanted: &str) -> String {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = orchestrator.get_status(task_id).await.unwrap().status;
        if current == wanted || tokio::time::Instant::now() >= deadline {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn poll_mode_runs_to_completion() {
    let transport = ScriptedTransport::new();
    transport.status(worker::WEATHER, RemoteStatus::Pending);
    transport.status(worker::WEATHER, RemoteStatus::InProgress);
    let (orchestrator, poller) = orchestrator(poll_runtime(transport.clone(), memory_store()));

    let report = orchestrator.create_task("case-1", trip()).await.unwrap();
    assert_eq!(report.status, status::DISPATCHED_A);
    assert_eq!(report.phase, RunPhase::Interrupted);
    assert!(poller.is_watching(&report.task_id).await);

    let handle = orchestrator.get_status(&report.task_id).await.unwrap().pending[0]
        .handle
        .clone();
    assert!(handle.starts_with("h-agent_a-"), "{handle}");

    let final_status = wait_for_status(&orchestrator, &report.task_id, status::COMPLETED).await;
    assert_eq!(final_status, status::COMPLETED);

    match orchestrator.get_result(&report.task_id).await.unwrap() {
        TaskResult::Completed { result, .. } => {
            assert!(result["summary"].as_str().unwrap().contains("台北"));
        }
        other => panic!("expected completed result, got {other:?}"),
    }

    let workers: Vec<String> = transport.requests().into_iter().map(|r| r.worker).collect();
    assert_eq!(workers, vec!["agent_a", "agent_b", "summary"]);

    // The loop lets go once nothing is outstanding.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!poller.is_watching(&report.task_id).await);
}

#[tokio::test]
async fn failed_remote_task_fails_the_step() {
    let transport = ScriptedTransport::new();
    transport.status(worker::WEATHER, RemoteStatus::Failed);
    let (orchestrator, _poller) = orchestrator(poll_runtime(transport, memory_store()));

    let report = orchestrator.create_task("case-2", trip()).await.unwrap();
    let final_status = wait_for_status(&orchestrator, &report.task_id, status::ERROR_A).await;
    assert_eq!(final_status, status::ERROR_A);

    let state = orchestrator.get_status(&report.task_id).await.unwrap();
    assert_eq!(state.phase, RunPhase::Terminal);
    assert!(state.pending.is_empty());
}

#[tokio::test]
async fn fetch_error_fails_the_step() {
    let transport = ScriptedTransport::new();
    transport.reply(worker::WEATHER, Err(DispatchError::worker("quota exceeded")));
    let (orchestrator, _poller) = orchestrator(poll_runtime(transport, memory_store()));

    let report = orchestrator.create_task("case-3", trip()).await.unwrap();
    let final_status = wait_for_status(&orchestrator, &report.task_id, status::ERROR_A).await;
    assert_eq!(final_status, status::ERROR_A);

    let trace = orchestrator.get_status(&report.task_id).await.unwrap().trace;
    assert!(trace.iter().any(|line| line.contains("quota exceeded")), "{trace:?}");
}

#[tokio::test]
async fn polled_question_waits_for_an_answer() {
    let transport = ScriptedTransport::new();
    transport.reply(worker::WEATHER, Ok(json!({ "needs_info": ["Which district?"] })));
    let (orchestrator, poller) = orchestrator(poll_runtime(transport.clone(), memory_store()));

    let report = orchestrator.create_task("case-4", trip()).await.unwrap();
    let paused = wait_for_status(&orchestrator, &report.task_id, status::AWAITING_HUMAN_INPUT).await;
    assert_eq!(paused, status::AWAITING_HUMAN_INPUT);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!poller.is_watching(&report.task_id).await, "nothing to poll while paused");

    let resumed = orchestrator
        .submit_human_answer(&report.task_id, "Da'an")
        .await
        .unwrap();
    assert_eq!(resumed.status, status::DISPATCHED_A);

    let final_status = wait_for_status(&orchestrator, &report.task_id, status::COMPLETED).await;
    assert_eq!(final_status, status::COMPLETED);

    let weather = transport.requests_to(worker::WEATHER);
    assert_eq!(weather.len(), 2);
    assert_eq!(weather[1].payload["human_answer"], "Da'an");
}

#[tokio::test]
async fn recover_picks_up_in_flight_tasks() {
    let transport = ScriptedTransport::new();
    let store = memory_store();

    // Left behind by a previous process: dispatched, never polled.
    let mut in_flight = TaskState::new("t-left", "case-5", status::NEW, trip());
    in_flight.apply(StateDelta::to(status::DISPATCHED_A).dispatched(worker::WEATHER, "h-old"));
    in_flight.phase = RunPhase::Interrupted;
    store.create(&in_flight).await.unwrap();

    let mut finished = TaskState::new("t-done", "case-6", status::COMPLETED, json!({}));
    finished.phase = RunPhase::Terminal;
    store.create(&finished).await.unwrap();

    let (orchestrator, poller) = orchestrator(poll_runtime(transport, store));
    assert_eq!(orchestrator.recover().await.unwrap(), 1);
    assert!(poller.is_watching("t-left").await);
    assert!(!poller.is_watching("t-done").await);

    // A second watch on the same task is a no-op.
    assert!(!poller.watch("t-left").await.unwrap());

    let final_status = wait_for_status(&orchestrator, "t-left", status::COMPLETED).await;
    assert_eq!(final_status, status::COMPLETED);
}
