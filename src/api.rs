//! REST API server for the multi-agent orchestrator
//!
//! Exposes the router over HTTP: one streaming chat endpoint plus health.
//! Turn chunks and progress notices are delivered as server-sent events.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router as HttpRouter,
};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::router::{Router, TurnEvent};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Omitted on the first message; the reply carries the generated id.
    pub session_id: Option<String>,
    pub message: String,
}

#[derive(Clone)]
pub struct ApiState {
    pub router: Arc<Router>,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Submit one user message and stream the turn back as SSE.
///
/// Event kinds: `session` (the session id, first), `progress` (best-effort
/// notices), `chunk` (final-message text) and `done` (end of turn). Closing
/// the connection cancels the turn; the in-flight action still completes.
async fn chat(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let session_id = req
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    info!(%session_id, "Received chat message");
    let handle = state.router.submit(session_id.clone(), req.message);

    let chunks = ReceiverStream::new(handle.events).map(|event| match event {
        TurnEvent::Chunk(text) => Event::default().event("chunk").data(text),
        TurnEvent::EndOfTurn => Event::default().event("done").data(""),
    });
    let notices =
        ReceiverStream::new(handle.progress).map(|n| Event::default().event("progress").data(n));

    let opening = tokio_stream::once(Event::default().event("session").data(session_id));
    let stream = opening.chain(chunks.merge(notices)).map(Ok::<_, Infallible>);

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub fn create_router(router: Arc<Router>) -> HttpRouter {
    let state = ApiState { router };

    HttpRouter::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

pub async fn start_server(
    router: Arc<Router>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let app = create_router(router);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, app).await?;

    Ok(())
}
