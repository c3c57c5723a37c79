use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Service-level error taxonomy.
///
/// Every variant carries enough context to diagnose the failure without
/// leaking credentials. The HTTP mapping lives in `IntoResponse`; the
/// machine-readable `code` lets callers distinguish recoverable challenges
/// (verify-code-required) from hard failures rendering the same status.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(anyhow::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(anyhow::Error),

    #[error("Verify code required: {0}")]
    VerifyCodeRequired(String),

    #[error("Session terminated: {0}")]
    SessionTerminated(String),

    #[error("Logged in from another place: {0}")]
    OtherPlaceLoggedIn(String),

    #[error("Logged in from another IP: {0}")]
    OtherIpLoggedIn(String),

    #[error("Password expired: {0}")]
    PasswordExpired(String),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error, details) = match self {
            AppError::ValidationError(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                "Validation error".to_string(),
                Some(err.to_string()),
            ),
            AppError::BadRequest(err) => {
                (StatusCode::BAD_REQUEST, "bad_request", err.to_string(), None)
            }
            AppError::NotFound(err) => (StatusCode::NOT_FOUND, "not_found", err.to_string(), None),
            AppError::Unauthorized(err) => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                err.to_string(),
                None,
            ),
            AppError::PermissionDenied(err) => (
                StatusCode::FORBIDDEN,
                "permission_denied",
                err.to_string(),
                None,
            ),
            AppError::VerifyCodeRequired(msg) => (
                StatusCode::FORBIDDEN,
                "verify_code_required",
                msg,
                None,
            ),
            AppError::SessionTerminated(msg) => (
                StatusCode::UNAUTHORIZED,
                "session_terminated",
                msg,
                None,
            ),
            AppError::OtherPlaceLoggedIn(msg) => (
                StatusCode::UNAUTHORIZED,
                "other_place_logged_in",
                msg,
                None,
            ),
            AppError::OtherIpLoggedIn(msg) => (
                StatusCode::UNAUTHORIZED,
                "other_ip_logged_in",
                msg,
                None,
            ),
            AppError::PasswordExpired(msg) => (
                StatusCode::UNAUTHORIZED,
                "password_expired",
                msg,
                None,
            ),
            AppError::Conflict(err) => (StatusCode::CONFLICT, "conflict", err.to_string(), None),
            AppError::DatabaseError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "database_error",
                "Database error".to_string(),
                Some(err.to_string()),
            ),
            AppError::InternalError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal server error".to_string(),
                Some(err.to_string()),
            ),
            AppError::ConfigError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                "Configuration error".to_string(),
                Some(err.to_string()),
            ),
        };

        (status, Json(ErrorBody { code, error, details })).into_response()
    }
}
