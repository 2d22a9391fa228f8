use axum::{http::StatusCode, response::IntoResponse, Json};
use thiserror::Error;

use crate::session::SendError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Push notification error: {0}")]
    Push(String),

    #[error("Startup error: {0}")]
    Startup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Failures surfaced to HTTP callers. Internal recovery and alerting stay
/// invisible except for the `retry` hint on 503.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("missing bearer token")]
    Unauthorized,

    #[error("invalid access token")]
    Forbidden,

    #[error("{0} is not registered on WhatsApp")]
    NotRegistered(String),

    #[error("WhatsApp session unavailable")]
    Unavailable { retry: bool },

    #[error("{0}")]
    Internal(String),
}

impl From<SendError> for ApiError {
    fn from(e: SendError) -> Self {
        match e {
            SendError::Invalid(msg) => ApiError::BadRequest(msg),
            SendError::NotRegistered(chat_id) => ApiError::NotRegistered(chat_id),
            SendError::Unavailable { retry } => ApiError::Unavailable { retry },
            SendError::Failed(msg) => ApiError::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotRegistered(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut body = serde_json::json!({
            "status": false,
            "error": self.to_string(),
        });
        if let ApiError::Unavailable { retry: true } = self {
            body["retry"] = serde_json::Value::Bool(true);
        }
        (status, Json(body)).into_response()
    }
}
