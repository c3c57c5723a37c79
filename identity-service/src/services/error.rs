use service_core::error::AppError;
use thiserror::Error;

/// Domain error taxonomy for the token engine.
///
/// Checker-stage failures keep their own kind all the way to the boundary
/// so a client can tell "retry with password" from "retry with a
/// verification code". Storage and collaborator failures collapse into
/// `Database`/`Internal` with the operation name in the message.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("verification code required: {0}")]
    VerifyCodeRequired(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("session terminated: {0}")]
    SessionTerminated(String),

    #[error("logged in from another place: {0}")]
    OtherPlaceLoggedIn(String),

    #[error("logged in from another ip: {0}")]
    OtherIpLoggedIn(String),

    #[error("password expired: {0}")]
    PasswordExpired(String),

    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::BadRequest(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            ServiceError::Unauthorized(e) => AppError::Unauthorized(anyhow::anyhow!(e)),
            ServiceError::VerifyCodeRequired(e) => AppError::VerifyCodeRequired(e),
            ServiceError::PermissionDenied(e) => AppError::PermissionDenied(anyhow::anyhow!(e)),
            ServiceError::SessionTerminated(e) => AppError::SessionTerminated(e),
            ServiceError::OtherPlaceLoggedIn(e) => AppError::OtherPlaceLoggedIn(e),
            ServiceError::OtherIpLoggedIn(e) => AppError::OtherIpLoggedIn(e),
            ServiceError::PasswordExpired(e) => AppError::PasswordExpired(e),
            ServiceError::NamespaceNotFound(e) => AppError::NotFound(anyhow::anyhow!(e)),
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Cache(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
