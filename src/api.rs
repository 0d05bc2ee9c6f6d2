//! REST API for the research assistant
//!
//! Exposes the per-session turn loop over HTTP. Charts are returned as Plotly
//! figures so a web frontend can render them directly.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::assistant::ResearchAssistant;
use crate::graph::{TurnOutcome, TurnResult};
use crate::models::Intent;

//
// ================= Request / Response =================
//

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub assistant: Arc<ResearchAssistant>,
}

//
// ================= Session ids =================
//

fn stable_uuid_from_string(input: &str) -> uuid::Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // version 4, RFC4122 variant
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes)
}

/// Accept real UUIDs as-is and map any other client token to a stable one
fn parse_or_stable_uuid(value: &str) -> uuid::Uuid {
    uuid::Uuid::parse_str(value.trim()).unwrap_or_else(|_| stable_uuid_from_string(value.trim()))
}

fn session_id_for(value: Option<&str>) -> uuid::Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => parse_or_stable_uuid(v),
        _ => uuid::Uuid::new_v4(),
    }
}

fn turn_payload(session_id: uuid::Uuid, result: &TurnResult) -> serde_json::Value {
    let (kind, intent) = match &result.outcome {
        TurnOutcome::Clarification { intent, .. } => ("clarification", *intent),
        TurnOutcome::Report { .. } => ("report", Intent::Actionable),
    };

    let mut payload = serde_json::json!({
        "session_id": session_id.to_string(),
        "type": kind,
        "intent": intent,
        "reply": result.reply(),
        "plan": result.plan().map(|p| p.descriptions()).unwrap_or_default(),
        "reasoning_trace": result.reasoning_trace,
        "execution_time_ms": result.execution_time_ms,
    });

    if let Some(report) = result.report() {
        let charts: Vec<serde_json::Value> = report
            .charts
            .iter()
            .map(|chart| {
                serde_json::json!({
                    "key": chart.key,
                    "title": chart.title,
                    "figure": chart.to_plotly(),
                })
            })
            .collect();
        payload["charts"] = serde_json::json!(charts);
        payload["sources"] = serde_json::json!(report.sources);
        payload["steps"] = serde_json::json!(report.steps);
        payload["synthesis"] = serde_json::json!(report.synthesis);
    }
    payload
}

//
// ================= Handlers =================
//

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let message = req.message.trim();
    if message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Message must not be empty".into())),
        );
    }

    let session_id = session_id_for(req.session_id.as_deref());
    info!(session = %session_id, "Chat request");

    match state.assistant.handle_message(session_id, message).await {
        Ok(result) => (
            StatusCode::OK,
            Json(ApiResponse::success(turn_payload(session_id, &result))),
        ),
        Err(e) => {
            error!(session = %session_id, error = %e, "Turn failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(format!("Turn failed: {}", e))),
            )
        }
    }
}

async fn history_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let session_id = parse_or_stable_uuid(&id);
    match state.assistant.history(session_id).await {
        Ok(Some(messages)) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "session_id": session_id.to_string(),
                "messages": messages,
            }))),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Session {} not found", session_id))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

async fn reset_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let session_id = parse_or_stable_uuid(&id);
    match state.assistant.reset(session_id).await {
        Ok(removed) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "session_id": session_id.to_string(),
                "removed": removed,
            }))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

//
// ================= Router =================
//

pub fn create_router(assistant: Arc<ResearchAssistant>) -> Router {
    let state = ApiState { assistant };

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/sessions/:id/history", get(history_handler))
        .route("/api/sessions/:id", axum::routing::delete(reset_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn start_server(
    assistant: Arc<ResearchAssistant>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(assistant);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
