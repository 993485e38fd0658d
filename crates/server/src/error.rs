use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Token verification failures, each with its own machine-readable code so
/// clients can tell a stale session from a forged or garbled token.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No token provided")]
    NoToken,
    #[error("Token has expired")]
    Expired { expired_at: String },
    #[error("Invalid token")]
    Invalid,
    #[error("Token not yet valid")]
    NotActive,
    #[error("Token verification failed")]
    Unverifiable,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::NoToken => "NO_TOKEN",
            AuthError::Expired { .. } => "TOKEN_EXPIRED",
            AuthError::Invalid => "INVALID_TOKEN",
            AuthError::NotActive => "TOKEN_NOT_ACTIVE",
            AuthError::Unverifiable => "TOKEN_INVALID",
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Auth(#[from] AuthError),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Auth(err) => {
                let mut body = json!({
                    "error": err.code(),
                    "message": err.to_string(),
                });
                if let AuthError::Expired { expired_at } = &err {
                    body["expiredAt"] = json!(expired_at);
                }
                (StatusCode::UNAUTHORIZED, Json(body)).into_response()
            }
            AppError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, Json(json!({ "message": message }))).into_response()
            }
            AppError::Forbidden(message) => {
                (StatusCode::FORBIDDEN, Json(json!({ "message": message }))).into_response()
            }
            AppError::Validation(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response()
            }
            AppError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "message": message }))).into_response()
            }
            AppError::Database(err) => {
                tracing::error!("database error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "message": err.to_string() })),
                )
                    .into_response()
            }
            AppError::Internal(message) => {
                tracing::error!("internal error: {message}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "message": message })),
                )
                    .into_response()
            }
        }
    }
}
