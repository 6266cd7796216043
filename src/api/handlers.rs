use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::engine::router::Route;
use crate::engine::types::DriveReport;
use crate::engine::{CallbackAck, StatusReport, TaskCallback, TaskResult};

use super::AppState;
use super::errors::AppError;

// --- Request/Response types ---

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    /// Caller's business identifier, e.g. a case id.
    #[serde(alias = "loan_case_id", alias = "case_id")]
    pub correlation_id: String,
    /// Task parameters handed to the workflow.
    #[serde(default, alias = "user_requirement", alias = "request")]
    pub payload: Option<serde_json::Value>,
}

#[derive(Deserialize)]
pub struct AnswerRequest {
    pub answer: String,
}

#[derive(Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<String>,
}

#[derive(Serialize)]
pub struct NodeInfo {
    pub name: String,
    pub description: String,
}

#[derive(Serialize)]
pub struct RouteInfo {
    pub status: String,
    pub next: Route,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub dispatch_mode: String,
}

// --- Handlers ---

/// POST /tasks
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<DriveReport>), AppError> {
    let payload = req
        .payload
        .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
    let report = state
        .orchestrator
        .create_task(&req.correlation_id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// GET /tasks
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListTasksQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tasks = state
        .orchestrator
        .list_tasks(params.status.as_deref())
        .await?;

    Ok(Json(serde_json::json!({
        "total": tasks.len(),
        "tasks": tasks,
    })))
}

/// GET /tasks/{id}
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StatusReport>, AppError> {
    let report = state.orchestrator.get_status(&id).await?;
    Ok(Json(report))
}

/// GET /tasks/{id}/result
///
/// 202 with the current status while the task is still running.
pub async fn get_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let result = state.orchestrator.get_result(&id).await?;
    let code = match result {
        TaskResult::NotReady { .. } => StatusCode::ACCEPTED,
        _ => StatusCode::OK,
    };
    Ok((code, Json(result)).into_response())
}

/// DELETE /tasks/{id}
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.orchestrator.delete_task(&id).await?;
    Ok(Json(serde_json::json!({
        "deleted": id,
    })))
}

/// POST /tasks/{id}/answer
pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AnswerRequest>,
) -> Result<Json<DriveReport>, AppError> {
    let report = state
        .orchestrator
        .submit_human_answer(&id, &req.answer)
        .await?;
    Ok(Json(report))
}

/// POST /callbacks
pub async fn deliver_callback(
    State(state): State<Arc<AppState>>,
    Json(callback): Json<TaskCallback>,
) -> Result<Json<CallbackAck>, AppError> {
    let ack = state.orchestrator.deliver_callback(callback).await?;
    Ok(Json(ack))
}

/// GET /graph
pub async fn describe_graph(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let runtime = state.orchestrator.runtime();
    let definition = runtime.definition();

    let routes: Vec<RouteInfo> = definition
        .routes
        .entries()
        .map(|(status, next)| RouteInfo {
            status: status.to_string(),
            next: next.clone(),
        })
        .collect();

    let mut interrupt_after: Vec<&String> = definition.interrupt_after.iter().collect();
    interrupt_after.sort();

    let nodes: Vec<NodeInfo> = runtime
        .registry()
        .list()
        .iter()
        .map(|(name, desc)| NodeInfo {
            name: name.to_string(),
            description: desc.to_string(),
        })
        .collect();

    Json(serde_json::json!({
        "workflow": definition.name,
        "dispatch_mode": state.orchestrator.mode(),
        "entry_status": definition.entry_status,
        "routes": routes,
        "interrupt_after": interrupt_after,
        "nodes": nodes,
    }))
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dispatch_mode: state.orchestrator.mode().to_string(),
    })
}
