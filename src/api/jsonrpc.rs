//! JSON-RPC 2.0 surface (`POST /jsonrpc`) for agent-to-agent callers.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::engine::{EngineError, TaskCallback, TaskResult};
use crate::workers::http::NOT_READY_CODE;

use super::AppState;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const NOT_FOUND: i64 = 404;
pub const CONFLICT: i64 = 409;

pub const METHODS: &[&str] = &[
    "a2a.describe_agent",
    "a2a.submit_task",
    "a2a.get_task_status",
    "a2a.get_task_result",
    "a2a.deliver_callback",
    "a2a.submit_human_answer",
];

#[derive(Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

struct RpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<EngineError> for RpcError {
    fn from(err: EngineError) -> Self {
        let code = match &err {
            EngineError::NotFound(_) => NOT_FOUND,
            EngineError::Conflict(_) => CONFLICT,
            EngineError::Invalid(_) => INVALID_PARAMS,
            _ => INTERNAL_ERROR,
        };
        RpcError::new(code, err.to_string())
    }
}

#[derive(Deserialize)]
struct SubmitParams {
    #[serde(alias = "loan_case_id", alias = "case_id")]
    correlation_id: String,
    #[serde(default, alias = "user_requirement")]
    payload: Option<Value>,
}

#[derive(Deserialize)]
struct TaskParams {
    task_id: String,
}

#[derive(Deserialize)]
struct AnswerParams {
    task_id: String,
    answer: String,
}

/// POST /jsonrpc
pub async fn handle(State(state): State<Arc<AppState>>, body: String) -> Response {
    let request: RpcRequest = match serde_json::from_str::<Value>(&body) {
        Err(e) => {
            warn!(error = %e, "Unparseable JSON-RPC body");
            return reply(StatusCode::BAD_REQUEST, Value::Null, Err(RpcError::new(PARSE_ERROR, "Parse error")));
        }
        Ok(raw) => match serde_json::from_value(raw) {
            Ok(request) => request,
            Err(e) => {
                return reply(
                    StatusCode::BAD_REQUEST,
                    Value::Null,
                    Err(RpcError::new(INVALID_REQUEST, format!("Invalid request: {}", e))),
                );
            }
        },
    };

    debug!(method = %request.method, id = %request.id, "JSON-RPC request");
    let outcome = dispatch(&state, &request.method, request.params).await;
    let status = match &outcome {
        Err(e) if e.code == METHOD_NOT_FOUND => StatusCode::NOT_FOUND,
        Err(e) if e.code == PARSE_ERROR || e.code == INVALID_PARAMS => StatusCode::BAD_REQUEST,
        _ => StatusCode::OK,
    };
    reply(status, request.id, outcome)
}

async fn dispatch(state: &AppState, method: &str, params: Value) -> Result<Value, RpcError> {
    let orchestrator = &state.orchestrator;
    match method {
        "a2a.describe_agent" => Ok(agent_card(state)),

        "a2a.submit_task" => {
            let p: SubmitParams = params_of(params)?;
            let payload = p.payload.unwrap_or_else(|| json!({}));
            let report = orchestrator.create_task(&p.correlation_id, payload).await?;
            Ok(json!({
                "task_id": report.task_id,
                "status": report.status,
                "message": "Workflow started.",
            }))
        }

        "a2a.get_task_status" => {
            let p: TaskParams = params_of(params)?;
            let report = orchestrator.get_status(&p.task_id).await?;
            Ok(to_value(&report))
        }

        "a2a.get_task_result" => {
            let p: TaskParams = params_of(params)?;
            match orchestrator.get_result(&p.task_id).await? {
                TaskResult::NotReady { task_id, status } => Err(RpcError::new(
                    NOT_READY_CODE,
                    "Task result is not ready yet.",
                )
                .with_data(json!({ "task_id": task_id, "status": status }))),
                done => Ok(to_value(&done)),
            }
        }

        "a2a.deliver_callback" => {
            let callback: TaskCallback = params_of(params)?;
            let ack = orchestrator.deliver_callback(callback).await?;
            Ok(to_value(&ack))
        }

        "a2a.submit_human_answer" => {
            let p: AnswerParams = params_of(params)?;
            let report = orchestrator.submit_human_answer(&p.task_id, &p.answer).await?;
            Ok(to_value(&report))
        }

        other => Err(RpcError::new(
            METHOD_NOT_FOUND,
            format!("Method {} not found", other),
        )),
    }
}

fn agent_card(state: &AppState) -> Value {
    let runtime = state.orchestrator.runtime();
    let capabilities: Vec<String> = runtime
        .definition()
        .steps
        .iter()
        .map(|s| format!("task.dispatch.{}", s.worker))
        .collect();

    json!({
        "agent_id": "taskrelay",
        "name": "taskrelay orchestrator",
        "version": env!("CARGO_PKG_VERSION"),
        "workflow": runtime.definition().name,
        "dispatch_mode": state.orchestrator.mode(),
        "capabilities": capabilities,
        "methods": METHODS,
        "protocol": {
            "type": "json-rpc",
            "version": "2.0",
        },
    })
}

fn params_of<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params)
        .map_err(|e| RpcError::new(INVALID_PARAMS, format!("Invalid params: {}", e)))
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn reply(status: StatusCode, id: Value, outcome: Result<Value, RpcError>) -> Response {
    let body = match outcome {
        Ok(result) => json!({ "jsonrpc": "2.0", "result": result, "id": id }),
        Err(err) => {
            let mut error = json!({ "code": err.code, "message": err.message });
            if let Some(data) = err.data {
                error["data"] = data;
            }
            json!({ "jsonrpc": "2.0", "error": error, "id": id })
        }
    };
    (status, Json(body)).into_response()
}
