use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, warn};

use crate::engine::error::EngineError;
use crate::engine::runtime::GraphRuntime;
use crate::engine::types::{ExternalUpdate, RunPhase, TaskState, WorkerCallback, needs_info_in};
use crate::workers::{DispatchError, FetchedResult, RemoteStatus};

/// Polls workers for tasks dispatched in poll mode and feeds finished
/// results back through [`GraphRuntime::resume`].
///
/// Each watched task gets its own loop. Loops sleep without holding
/// anything, and a shared semaphore bounds how many tasks poll at once, so
/// a slow worker on one task never stalls the others.
pub struct PollScheduler {
    runtime: Arc<GraphRuntime>,
    interval: Duration,
    permits: Arc<Semaphore>,
    watching: Mutex<HashSet<String>>,
}

impl PollScheduler {
    pub fn new(runtime: Arc<GraphRuntime>, interval: Duration, max_concurrent: usize) -> Self {
        Self {
            runtime,
            interval,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            watching: Mutex::new(HashSet::new()),
        }
    }

    /// Start polling `task_id` unless it is already watched or has nothing
    /// outstanding. Returns whether a new poll loop was started.
    pub async fn watch(self: &Arc<Self>, task_id: &str) -> Result<bool, EngineError> {
        let mut watching = self.watching.lock().await;
        if watching.contains(task_id) {
            return Ok(false);
        }
        let checkpoint = self.runtime.store().load(task_id).await?;
        if !needs_polling(&checkpoint.state) {
            return Ok(false);
        }

        watching.insert(task_id.to_string());
        info!(task_id = %task_id, interval_ms = self.interval.as_millis() as u64, "Watching task");
        tokio::spawn(self.clone().poll_loop(task_id.to_string()));
        Ok(true)
    }

    pub async fn is_watching(&self, task_id: &str) -> bool {
        self.watching.lock().await.contains(task_id)
    }

    /// Re-watch every stored task that still has outstanding dispatches,
    /// e.g. after a restart.
    pub async fn recover(self: &Arc<Self>) -> Result<usize, EngineError> {
        let mut started = 0;
        for state in self.runtime.store().list(None).await? {
            if needs_polling(&state) && self.watch(&state.task_id).await? {
                started += 1;
            }
        }
        if started > 0 {
            info!(tasks = started, "Recovered in-flight poll dispatches");
        }
        Ok(started)
    }

    async fn poll_loop(self: Arc<Self>, task_id: String) {
        loop {
            tokio::time::sleep(self.interval).await;

            {
                let Ok(_permit) = self.permits.acquire().await else {
                    break;
                };
                if let Err(e) = self.tick(&task_id).await {
                    error!(task_id = %task_id, error = %e, "Poll tick failed");
                }
            }

            // Decide under the lock so a concurrent `watch` never sees a
            // loop that is about to exit.
            let mut watching = self.watching.lock().await;
            let keep = match self.runtime.store().load(&task_id).await {
                Ok(checkpoint) => needs_polling(&checkpoint.state),
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "Task unreadable, stop polling");
                    false
                }
            };
            if !keep {
                watching.remove(&task_id);
                info!(task_id = %task_id, "Stopped watching task");
                return;
            }
        }
        self.watching.lock().await.remove(&task_id);
    }

    /// Poll every outstanding dispatch of the task once.
    async fn tick(&self, task_id: &str) -> Result<(), EngineError> {
        let checkpoint = self.runtime.store().load(task_id).await?;
        let workers = self.runtime.workers();

        for (worker, pending) in &checkpoint.state.pending_dispatch {
            let handle = pending.handle.as_str();
            let callback = match workers.poll_status(worker, handle).await {
                Ok(RemoteStatus::Pending | RemoteStatus::InProgress) => {
                    debug!(task_id = %task_id, worker = %worker, handle = %handle, "Not done yet");
                    continue;
                }
                Ok(RemoteStatus::Done) => match workers.fetch_result(worker, handle).await {
                    Ok(FetchedResult::Ready(result)) => WorkerCallback {
                        worker_name: worker.clone(),
                        status: "done".to_string(),
                        needs_info: needs_info_in(&result),
                        result,
                    },
                    Ok(FetchedResult::NotReady(status)) => {
                        debug!(task_id = %task_id, worker = %worker, status = ?status, "Result not ready");
                        continue;
                    }
                    Err(e) => failed(worker, &e),
                },
                Ok(RemoteStatus::Failed) => failed(
                    worker,
                    &DispatchError::worker(format!("task {} reported FAILED", handle)),
                ),
                Err(e) => failed(worker, &e),
            };

            info!(task_id = %task_id, worker = %worker, status = %callback.status, "Poll produced a result");
            match self
                .runtime
                .resume(task_id, &ExternalUpdate::WorkerResult(callback))
                .await
            {
                Ok(_) => {}
                Err(e @ (EngineError::StaleCallback { .. } | EngineError::UnknownDispatch { .. })) => {
                    debug!(task_id = %task_id, worker = %worker, "Poll result superseded: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn needs_polling(state: &TaskState) -> bool {
    state.phase != RunPhase::Terminal && !state.pending_dispatch.is_empty()
}

fn failed(worker: &str, err: &DispatchError) -> WorkerCallback {
    WorkerCallback {
        worker_name: worker.to_string(),
        status: "failed".to_string(),
        result: serde_json::json!({ "error": err.to_string() }),
        needs_info: None,
    }
}
