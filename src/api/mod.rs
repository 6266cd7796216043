mod errors;
pub mod handlers;
pub mod jsonrpc;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::engine::Orchestrator;

pub use errors::AppError;

/// Shared application state accessible by all handlers.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the HTTP router: REST task surface, callbacks, JSON-RPC.
pub fn router(orchestrator: Arc<Orchestrator>, max_body: usize) -> Router {
    let state = Arc::new(AppState { orchestrator });

    Router::new()
        .route("/tasks", post(handlers::create_task).get(handlers::list_tasks))
        .route(
            "/tasks/{id}",
            get(handlers::get_task).delete(handlers::delete_task),
        )
        .route("/tasks/{id}/result", get(handlers::get_result))
        .route("/tasks/{id}/answer", post(handlers::submit_answer))
        .route("/callbacks", post(handlers::deliver_callback))
        .route("/jsonrpc", post(jsonrpc::handle))
        .route("/graph", get(handlers::describe_graph))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the REST API server.
pub async fn serve(
    orchestrator: Arc<Orchestrator>,
    host: &str,
    port: u16,
    max_body: usize,
) -> Result<()> {
    let app = router(orchestrator.clone(), max_body);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!(mode = %orchestrator.mode(), "taskrelay listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
