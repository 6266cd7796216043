use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{DispatchError, FetchedResult, RemoteStatus, WorkRequest, WorkerTransport};

/// JSON-RPC code workers use for "result not ready yet".
pub const NOT_READY_CODE: i64 = 202;

/// Where a worker agent lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerEndpoint {
    pub base_url: String,
    /// Path of the synchronous compute route (direct mode).
    #[serde(default = "default_compute_path")]
    pub compute_path: String,
    /// Path of the JSON-RPC route (poll mode).
    #[serde(default = "default_rpc_path")]
    pub rpc_path: String,
}

fn default_compute_path() -> String {
    "/compute".to_string()
}

fn default_rpc_path() -> String {
    "/jsonrpc".to_string()
}

impl WorkerEndpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            compute_path: default_compute_path(),
            rpc_path: default_rpc_path(),
        }
    }

    pub fn with_compute_path(mut self, path: impl Into<String>) -> Self {
        self.compute_path = path.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

enum RpcReply {
    Result(serde_json::Value),
    Error { code: i64, message: String },
}

/// Talks to worker agents over HTTP: plain JSON POST for direct calls,
/// JSON-RPC 2.0 (`a2a.submit_task`, `a2a.get_task_status`,
/// `a2a.get_task_result`) for the submit/poll protocol.
pub struct HttpWorkerTransport {
    client: reqwest::Client,
    endpoints: HashMap<String, WorkerEndpoint>,
}

impl HttpWorkerTransport {
    pub fn new(endpoints: HashMap<String, WorkerEndpoint>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoints })
    }

    fn endpoint(&self, worker: &str) -> Result<&WorkerEndpoint, DispatchError> {
        self.endpoints
            .get(worker)
            .ok_or_else(|| DispatchError::worker(format!("no endpoint configured for worker '{}'", worker)))
    }

    async fn rpc(
        &self,
        worker: &str,
        method: &str,
        params: serde_json::Value,
        idempotency_key: Option<&str>,
    ) -> Result<RpcReply, DispatchError> {
        let endpoint = self.endpoint(worker)?;
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": uuid::Uuid::new_v4().to_string(),
            "method": method,
            "params": params,
        });

        let mut request = self.client.post(endpoint.url(&endpoint.rpc_path)).json(&body);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_server_error() {
            return Err(DispatchError::Transport(format!(
                "{} {} returned {}",
                worker, method, status
            )));
        }

        // JSON-RPC errors may ride on 4xx responses; read the body before judging the status.
        let text = response.text().await?;
        let reply: serde_json::Value = match serde_json::from_str(&text) {
            Ok(reply) => reply,
            Err(_) if status.is_client_error() => {
                return Err(DispatchError::Worker {
                    code: Some(i64::from(status.as_u16())),
                    message: text,
                });
            }
            Err(e) => {
                return Err(DispatchError::Protocol(format!(
                    "{} {}: invalid JSON-RPC body: {}",
                    worker, method, e
                )));
            }
        };
        debug!(worker = %worker, method = %method, reply = %reply, "JSON-RPC reply");

        if let Some(result) = reply.get("result") {
            return Ok(RpcReply::Result(result.clone()));
        }
        if let Some(error) = reply.get("error") {
            let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string();
            return Ok(RpcReply::Error { code, message });
        }
        Err(DispatchError::Protocol(format!(
            "{} {}: reply has neither result nor error",
            worker, method
        )))
    }
}

fn rpc_error(code: i64, message: String) -> DispatchError {
    // -32xxx are JSON-RPC framework errors; everything else is the worker's verdict.
    if (-32768..=-32000).contains(&code) {
        DispatchError::Protocol(format!("JSON-RPC error {}: {}", code, message))
    } else {
        DispatchError::Worker {
            code: Some(code),
            message,
        }
    }
}

#[async_trait]
impl WorkerTransport for HttpWorkerTransport {
    async fn compute(&self, request: &WorkRequest) -> Result<serde_json::Value, DispatchError> {
        let endpoint = self.endpoint(&request.worker)?;
        let url = endpoint.url(&endpoint.compute_path);
        info!(task_id = %request.task_id, worker = %request.worker, url = %url, "Calling worker");

        let response = self
            .client
            .post(&url)
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&request.payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(DispatchError::Worker {
                code: Some(i64::from(status.as_u16())),
                message: detail,
            });
        }
        if !status.is_success() {
            return Err(DispatchError::Transport(format!(
                "{} returned {}",
                url, status
            )));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| DispatchError::Protocol(format!("{}: invalid JSON body: {}", url, e)))
    }

    async fn submit(&self, request: &WorkRequest) -> Result<String, DispatchError> {
        let params = serde_json::json!({
            "task_id": request.task_id,
            "correlation_id": request.correlation_id,
            "idempotency_key": request.idempotency_key,
            "payload": request.payload,
        });
        match self
            .rpc(
                &request.worker,
                "a2a.submit_task",
                params,
                Some(&request.idempotency_key),
            )
            .await?
        {
            RpcReply::Result(result) => result
                .get("task_id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    DispatchError::Protocol("a2a.submit_task reply lacks task_id".to_string())
                }),
            RpcReply::Error { code, message } => Err(rpc_error(code, message)),
        }
    }

    async fn poll_status(&self, worker: &str, handle: &str) -> Result<RemoteStatus, DispatchError> {
        let params = serde_json::json!({ "task_id": handle });
        match self.rpc(worker, "a2a.get_task_status", params, None).await? {
            RpcReply::Result(result) => {
                let raw = result
                    .get("status")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                RemoteStatus::parse(raw).ok_or_else(|| {
                    DispatchError::Protocol(format!("unknown remote status '{}'", raw))
                })
            }
            RpcReply::Error { code, message } => Err(rpc_error(code, message)),
        }
    }

    async fn fetch_result(&self, worker: &str, handle: &str) -> Result<FetchedResult, DispatchError> {
        let params = serde_json::json!({ "task_id": handle });
        match self.rpc(worker, "a2a.get_task_result", params, None).await? {
            RpcReply::Result(result) => {
                let status = result
                    .get("status")
                    .and_then(|v| v.as_str())
                    .and_then(RemoteStatus::parse)
                    .unwrap_or(RemoteStatus::Done);
                match status {
                    RemoteStatus::Done => Ok(FetchedResult::Ready(
                        result.get("result").cloned().unwrap_or(serde_json::Value::Null),
                    )),
                    RemoteStatus::Failed => Err(DispatchError::worker(format!(
                        "{} reported task {} failed",
                        worker, handle
                    ))),
                    pending => Ok(FetchedResult::NotReady(pending)),
                }
            }
            RpcReply::Error { code, .. } if code == NOT_READY_CODE => {
                Ok(FetchedResult::NotReady(RemoteStatus::InProgress))
            }
            RpcReply::Error { code, message } => Err(rpc_error(code, message)),
        }
    }
}
