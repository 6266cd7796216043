pub mod bus;
pub mod error;
pub mod http;

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use self::bus::{ChannelEventBus, DispatchEvent, EventBus, HttpEventBus};
pub use self::error::DispatchError;
pub use self::http::{HttpWorkerTransport, WorkerEndpoint};

/// How work is handed to worker agents. Selected once at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Blocking call; the result comes back in the reply.
    Direct,
    /// Submit, then poll status and fetch the result.
    Poll,
    /// Publish to a message bus; the result arrives through a callback.
    Event,
}

impl DispatchMode {
    pub fn is_async(&self) -> bool {
        !matches!(self, DispatchMode::Direct)
    }
}

impl std::fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchMode::Direct => write!(f, "direct"),
            DispatchMode::Poll => write!(f, "poll"),
            DispatchMode::Event => write!(f, "event"),
        }
    }
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" | "local" => Ok(DispatchMode::Direct),
            "poll" | "polling" => Ok(DispatchMode::Poll),
            "event" | "eventbridge" => Ok(DispatchMode::Event),
            other => Err(format!(
                "Invalid dispatch mode '{}'. Use: direct, poll, event",
                other
            )),
        }
    }
}

/// A unit of work addressed to one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkRequest {
    pub task_id: String,
    pub correlation_id: String,
    pub worker: String,
    /// Stable per `(task, worker)`, so a re-sent dispatch is recognised by the worker.
    pub idempotency_key: String,
    pub payload: serde_json::Value,
}

impl WorkRequest {
    pub fn new(
        task_id: &str,
        correlation_id: &str,
        worker: &str,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            task_id: task_id.to_string(),
            correlation_id: correlation_id.to_string(),
            worker: worker.to_string(),
            idempotency_key: format!("{}:{}", task_id, worker),
            payload,
        }
    }
}

/// Uniform result of [`WorkerClient::invoke`], whatever the dispatch mode.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(serde_json::Value),
    Dispatched(String),
    Failed(DispatchError),
}

/// Remote task status as reported by `a2a.get_task_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl RemoteStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" | "QUEUED" | "SUBMITTED" => Some(RemoteStatus::Pending),
            "IN_PROGRESS" | "RUNNING" | "WORKING" => Some(RemoteStatus::InProgress),
            "DONE" | "COMPLETED" | "SUCCESS" => Some(RemoteStatus::Done),
            "FAILED" | "ERROR" => Some(RemoteStatus::Failed),
            _ => None,
        }
    }
}

/// Reply of `a2a.get_task_result`.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedResult {
    /// The worker is not done yet. Not an error.
    NotReady(RemoteStatus),
    Ready(serde_json::Value),
}

/// Wire-level access to worker agents.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    /// Direct mode: one synchronous `compute(payload) -> result` call.
    async fn compute(&self, request: &WorkRequest) -> Result<serde_json::Value, DispatchError>;

    /// Poll mode: submit and return the worker's task handle.
    async fn submit(&self, request: &WorkRequest) -> Result<String, DispatchError>;

    async fn poll_status(&self, worker: &str, handle: &str)
    -> Result<RemoteStatus, DispatchError>;

    async fn fetch_result(&self, worker: &str, handle: &str)
    -> Result<FetchedResult, DispatchError>;
}

/// Bounded retry for transport failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first try.
    pub max_retries: u32,
    /// Initial backoff duration in seconds (doubles each attempt).
    pub backoff_s: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_s: 0.5,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_s: 0.0,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let secs = self.backoff_s * 2.0_f64.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(secs.max(0.0))
    }
}

enum Channel {
    Transport(Arc<dyn WorkerTransport>),
    Bus(Arc<dyn EventBus>),
}

/// Client for calling remote worker agents in the configured [`DispatchMode`].
pub struct WorkerClient {
    mode: DispatchMode,
    channel: Channel,
    retry: RetryPolicy,
}

impl WorkerClient {
    pub fn direct(transport: Arc<dyn WorkerTransport>, retry: RetryPolicy) -> Self {
        Self {
            mode: DispatchMode::Direct,
            channel: Channel::Transport(transport),
            retry,
        }
    }

    pub fn poll(transport: Arc<dyn WorkerTransport>, retry: RetryPolicy) -> Self {
        Self {
            mode: DispatchMode::Poll,
            channel: Channel::Transport(transport),
            retry,
        }
    }

    pub fn event(bus: Arc<dyn EventBus>, retry: RetryPolicy) -> Self {
        Self {
            mode: DispatchMode::Event,
            channel: Channel::Bus(bus),
            retry,
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Hand `request` to its worker and report what happened.
    pub async fn invoke(&self, request: &WorkRequest) -> Outcome {
        let result = match (&self.channel, self.mode) {
            (Channel::Transport(t), DispatchMode::Direct) => self
                .with_retry("compute", &request.worker, || t.compute(request))
                .await
                .map(Outcome::Completed),
            (Channel::Transport(t), _) => self
                .with_retry("submit", &request.worker, || t.submit(request))
                .await
                .map(Outcome::Dispatched),
            (Channel::Bus(bus), _) => {
                let event = DispatchEvent::for_request(request);
                self.with_retry("publish", &request.worker, || bus.publish(&event))
                    .await
                    .map(Outcome::Dispatched)
            }
        };
        result.unwrap_or_else(Outcome::Failed)
    }

    pub async fn poll_status(
        &self,
        worker: &str,
        handle: &str,
    ) -> Result<RemoteStatus, DispatchError> {
        let transport = self.transport()?;
        self.with_retry("poll_status", worker, || transport.poll_status(worker, handle))
            .await
    }

    pub async fn fetch_result(
        &self,
        worker: &str,
        handle: &str,
    ) -> Result<FetchedResult, DispatchError> {
        let transport = self.transport()?;
        self.with_retry("fetch_result", worker, || {
            transport.fetch_result(worker, handle)
        })
        .await
    }

    fn transport(&self) -> Result<&Arc<dyn WorkerTransport>, DispatchError> {
        match &self.channel {
            Channel::Transport(t) => Ok(t),
            Channel::Bus(_) => Err(DispatchError::Protocol(
                "event-mode workers cannot be polled".to_string(),
            )),
        }
    }

    /// Retry transport failures with exponential backoff; once the attempts
    /// are used up the failure is reported as a worker error.
    async fn with_retry<T, F, Fut>(
        &self,
        op: &str,
        worker: &str,
        mut call: F,
    ) -> Result<T, DispatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DispatchError>>,
    {
        let max_attempts = self.retry.max_retries + 1;
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        worker = %worker,
                        op = %op,
                        attempt = attempt,
                        max = max_attempts,
                        error = %err,
                        "Worker call failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => {
                    info!(worker = %worker, op = %op, attempts = attempt, "Transport retries exhausted");
                    return Err(DispatchError::worker(format!(
                        "{} failed after {} attempts: {}",
                        op, attempt, err
                    )));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dispatch_modes() {
        assert_eq!("direct".parse::<DispatchMode>(), Ok(DispatchMode::Direct));
        assert_eq!("Poll".parse::<DispatchMode>(), Ok(DispatchMode::Poll));
        assert_eq!("eventbridge".parse::<DispatchMode>(), Ok(DispatchMode::Event));
        assert!("carrier-pigeon".parse::<DispatchMode>().is_err());
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff_s: 0.5,
        };
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_secs(1));
        assert_eq!(policy.delay(3), Duration::from_secs(2));
    }

    #[test]
    fn remote_status_aliases() {
        assert_eq!(RemoteStatus::parse("done"), Some(RemoteStatus::Done));
        assert_eq!(RemoteStatus::parse("IN_PROGRESS"), Some(RemoteStatus::InProgress));
        assert_eq!(RemoteStatus::parse("queued"), Some(RemoteStatus::Pending));
        assert_eq!(RemoteStatus::parse("exploded"), None);
    }

    #[test]
    fn idempotency_key_is_stable_per_worker() {
        let a = WorkRequest::new("t1", "case-1", "agent_a", serde_json::json!({}));
        let b = WorkRequest::new("t1", "case-1", "agent_a", serde_json::json!({"x": 1}));
        assert_eq!(a.idempotency_key, b.idempotency_key);
        assert_eq!(a.idempotency_key, "t1:agent_a");
    }
}
