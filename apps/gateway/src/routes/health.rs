use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::AppState;

pub const SERVICE_NAME: &str = "chat-gateway";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    /// Users with at least one live session.
    pub users: usize,
    pub sessions: usize,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
}

async fn index() -> &'static str {
    "chat-gateway\n\nWebSocket: GET /ws\nHealth: GET /health\n"
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        users: state.registry.user_count(),
        sessions: state.registry.session_count(),
    })
}
