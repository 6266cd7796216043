use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use super::{DispatchError, WorkRequest};

pub const EVENT_SOURCE: &str = "taskrelay.orchestrator";

/// Message published to the broker in event mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub event_id: String,
    pub source: String,
    /// e.g. `Task.agent_a`; brokers route on it.
    pub detail_type: String,
    pub detail: WorkRequest,
    pub published_at: DateTime<Utc>,
}

impl DispatchEvent {
    pub fn for_request(request: &WorkRequest) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            source: EVENT_SOURCE.to_string(),
            detail_type: format!("Task.{}", request.worker),
            detail: request.clone(),
            published_at: Utc::now(),
        }
    }
}

/// Fire-and-forget dispatch. The returned id is the handle callbacks correlate on.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: &DispatchEvent) -> Result<String, DispatchError>;
}

/// In-process bus backed by a bounded tokio channel.
pub struct ChannelEventBus {
    tx: mpsc::Sender<DispatchEvent>,
}

impl ChannelEventBus {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DispatchEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventBus for ChannelEventBus {
    async fn publish(&self, event: &DispatchEvent) -> Result<String, DispatchError> {
        self.tx
            .send(event.clone())
            .await
            .map_err(|_| DispatchError::Transport("event channel closed".to_string()))?;
        info!(
            task_id = %event.detail.task_id,
            worker = %event.detail.worker,
            event_id = %event.event_id,
            "Published dispatch event"
        );
        Ok(event.event_id.clone())
    }
}

/// Publishes events as JSON to an HTTP broker ingress.
pub struct HttpEventBus {
    client: reqwest::Client,
    url: String,
}

impl HttpEventBus {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl EventBus for HttpEventBus {
    async fn publish(&self, event: &DispatchEvent) -> Result<String, DispatchError> {
        let response = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", &event.detail.idempotency_key)
            .json(event)
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Worker {
                code: Some(i64::from(status.as_u16())),
                message: format!("broker rejected event: {}", body),
            });
        }
        if !status.is_success() {
            return Err(DispatchError::Transport(format!(
                "broker returned {}",
                status
            )));
        }

        // Brokers may assign their own id; fall back to ours.
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let event_id = body
            .get("event_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| event.event_id.clone());

        info!(
            task_id = %event.detail.task_id,
            worker = %event.detail.worker,
            event_id = %event_id,
            "Published dispatch event to broker"
        );
        Ok(event_id)
    }
}
