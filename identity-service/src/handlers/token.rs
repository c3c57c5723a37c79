//! HTTP handlers for the token endpoints. Thin wrappers: extract, call
//! `TokenService`, serialize.

use axum::{
    extract::{ConnectInfo, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::net::SocketAddr;

use crate::dtos::token::{
    ChangeNamespaceRequest, DescribeTokenRequest, IssueTokenRequest, QueryTokenRequest,
    RevokeTokenRequest, TokenSet, ValidateTokenRequest,
};
use crate::dtos::ErrorResponse;
use crate::models::Token;
use crate::utils::validation::ValidatedJson;
use crate::AppState;
use service_core::error::AppError;

/// Issue a token for a login request.
///
/// POST /tokens
#[utoipa::path(
    post,
    path = "/tokens",
    request_body = IssueTokenRequest,
    responses(
        (status = 201, description = "Token issued", body = Token),
        (status = 400, description = "Malformed grant", body = ErrorResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Verification required or denied", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Token"
)]
pub async fn issue_token(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ValidatedJson(req): ValidatedJson<IssueTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let req = req.with_client_ip(&addr.ip().to_string());
    let token = state.tokens.issue_token(&req).await?;
    Ok((StatusCode::CREATED, Json(token)))
}

/// Resolve an access token to its session, renewing silently when only the
/// access window has lapsed.
///
/// POST /tokens/validate
#[utoipa::path(
    post,
    path = "/tokens/validate",
    request_body = ValidateTokenRequest,
    responses(
        (status = 200, description = "Token is valid", body = Token),
        (status = 401, description = "Unknown or terminated session", body = ErrorResponse),
        (status = 403, description = "Session blocked", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Token"
)]
pub async fn validate_token(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ValidateTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let token = state.tokens.validate_token(&req.access_token).await?;
    Ok(Json(token))
}

/// Logout: revoke a token pair.
///
/// DELETE /tokens
#[utoipa::path(
    delete,
    path = "/tokens",
    request_body = RevokeTokenRequest,
    responses(
        (status = 204, description = "Token revoked"),
        (status = 400, description = "Refresh token does not match", body = ErrorResponse),
        (status = 401, description = "Unknown token", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Token"
)]
pub async fn revoke_token(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RevokeTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.tokens.revoke_token(&req).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Switch the session's working namespace.
///
/// PATCH /tokens/namespace
#[utoipa::path(
    patch,
    path = "/tokens/namespace",
    request_body = ChangeNamespaceRequest,
    responses(
        (status = 200, description = "Namespace switched", body = Token),
        (status = 403, description = "No access to the namespace", body = ErrorResponse),
        (status = 404, description = "Unknown namespace", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Token"
)]
pub async fn change_namespace(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ChangeNamespaceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let token = state.tokens.change_namespace(&req).await?;
    Ok(Json(token))
}

/// Resolve a session and list the namespaces its user can reach.
///
/// POST /tokens/describe
#[utoipa::path(
    post,
    path = "/tokens/describe",
    request_body = DescribeTokenRequest,
    responses(
        (status = 200, description = "Session detail", body = Token),
        (status = 401, description = "Unknown token", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Token"
)]
pub async fn describe_token(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<DescribeTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let token = state.tokens.describe_token(&req.access_token).await?;
    Ok(Json(token))
}

/// Login history, paged newest first.
///
/// GET /tokens
#[utoipa::path(
    get,
    path = "/tokens",
    params(QueryTokenRequest),
    responses(
        (status = 200, description = "Login history page", body = TokenSet),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Token"
)]
pub async fn query_tokens(
    State(state): State<AppState>,
    Query(req): Query<QueryTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let set = state.tokens.query_tokens(&req).await?;
    Ok(Json(set))
}
