use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::request::{RequestStatus, TransitionAction};
use crate::workflow::status::TransitionError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("actor lacks capability for this action")]
    Authorization,

    #[error("cannot {action} a request in status {from}", action = action.as_str(), from = from.as_str())]
    IllegalState {
        from: RequestStatus,
        action: TransitionAction,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("request not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<TransitionError> for AppError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::IllegalState { from, action } => {
                AppError::IllegalState { from, action }
            }
            TransitionError::Validation(msg) => AppError::Validation(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg, state) = match &self {
            AppError::Authorization => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "not_authorized",
                "actor lacks capability for this action".to_string(),
                None,
            ),
            AppError::IllegalState { from, action } => (
                StatusCode::CONFLICT,
                "state_error",
                "illegal_transition",
                format!(
                    "cannot {} a request in status {}",
                    action.as_str(),
                    from.as_str()
                ),
                // The caller resyncs from the current state.
                Some(from.as_str()),
            ),
            AppError::Validation(reason) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_request_error",
                "validation_failed",
                reason.clone(),
                None,
            ),
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                "invalid_request_error",
                "not_found",
                "request not found".to_string(),
                None,
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                    None,
                )
            }
            AppError::Redis(e) => {
                tracing::error!("Redis error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                    None,
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                    None,
                )
            }
        };

        let mut error = json!({
            "message": msg,
            "type": error_type,
            "code": code,
        });
        if let Some(state) = state {
            error["current_status"] = json!(state);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

// ── Tests ─────────────────────────────────────────────────────
