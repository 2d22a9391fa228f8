use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::{info, warn};

use crate::api::health::HealthSnapshot;
use crate::api::latency::LatencyStats;
use crate::error::ApiError;
use crate::session::{SendGate, SendRequest, Session};

#[derive(Clone)]
pub struct ApiState {
    pub session: Arc<Session>,
    pub gate: Arc<SendGate>,
    pub latency: Arc<LatencyStats>,
    pub access_token: Arc<str>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/send", post(send_message))
        .route("/test", get(get_test))
        .route("/health", get(get_health))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn send_message(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&headers, &state.access_token)?;

    let request: SendRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))?;

    match state.gate.send(&request).await {
        Ok(delivered) => {
            info!(delivered, "[SEND] request completed");
            Ok(Json(json!({ "status": true })))
        }
        Err(e) => {
            warn!("[SEND] request failed: {e}");
            Err(e.into())
        }
    }
}

/// Liveness for load balancers: ready only if a live round-trip succeeds.
async fn get_test(State(state): State<ApiState>) -> impl IntoResponse {
    if state.session.handle.is_live().await {
        (StatusCode::OK, Json(json!({ "status": "ok", "whatsapp": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "error", "whatsapp": "not ready" })),
        )
    }
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthSnapshot> {
    let s = &state.session;
    Json(HealthSnapshot::capture(
        &s.state,
        &s.counter,
        &s.recovery,
        &state.latency,
    ))
}

fn authorize(headers: &HeaderMap, expected: &str) -> Result<(), ApiError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::Unauthorized)?;
    if token != expected {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}
