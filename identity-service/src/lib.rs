pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use service_core::error::AppError;
use service_core::middleware::request_id::{request_id_middleware, REQUEST_ID_HEADER};
use service_core::middleware::security_headers::security_headers_middleware;

use crate::config::{Environment, IdentityConfig};
use crate::models::{CLIENT_ID_HEADER, CLIENT_SECRET_HEADER};
use crate::services::cache::SecurityCache;
use crate::services::credential::CredentialValidator;
use crate::services::TokenService;

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::token::issue_token,
        handlers::token::validate_token,
        handlers::token::revoke_token,
        handlers::token::change_namespace,
        handlers::token::describe_token,
        handlers::token::query_tokens,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::token::IssueTokenRequest,
            dtos::token::ValidateTokenRequest,
            dtos::token::RevokeTokenRequest,
            dtos::token::ChangeNamespaceRequest,
            dtos::token::DescribeTokenRequest,
            dtos::token::TokenSet,
            models::Token,
            models::TokenStatus,
            models::BlockReason,
            models::GrantType,
            models::Platform,
            models::UserType,
        )
    ),
    tags(
        (name = "Token", description = "Session token issuance and lifecycle"),
        (name = "Observability", description = "Service health"),
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub pool: PgPool,
    pub tokens: Arc<TokenService>,
    pub credentials: Arc<CredentialValidator>,
    pub cache: Arc<dyn SecurityCache>,
}

pub fn build_router(state: AppState) -> Router {
    // Every token endpoint requires an authenticated service caller.
    let token_routes = Router::new()
        .route(
            "/tokens",
            post(handlers::token::issue_token)
                .delete(handlers::token::revoke_token)
                .get(handlers::token::query_tokens),
        )
        .route("/tokens/validate", post(handlers::token::validate_token))
        .route(
            "/tokens/namespace",
            axum::routing::patch(handlers::token::change_namespace),
        )
        .route("/tokens/describe", post(handlers::token::describe_token))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::service_auth_middleware,
        ));

    let mut app = Router::new().route("/health", get(health_check));

    let swagger_enabled = match state.config.environment {
        Environment::Dev => true,
        Environment::Prod => state.config.swagger_enabled,
    };
    if swagger_enabled {
        app =
            app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { axum::Json(ApiDoc::openapi()) }),
        );
    }

    app.merge(token_routes)
        .with_state(state.clone())
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(
                    state
                        .config
                        .allowed_origins
                        .iter()
                        .map(|o| {
                            o.parse::<HeaderValue>().unwrap_or_else(|e| {
                                tracing::error!(
                                    "Invalid CORS origin '{}': {}. Using fallback.",
                                    o,
                                    e
                                );
                                HeaderValue::from_static("*")
                            })
                        })
                        .collect::<Vec<HeaderValue>>(),
                )
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    header::CONTENT_TYPE,
                    HeaderName::from_static(CLIENT_ID_HEADER),
                    HeaderName::from_static(CLIENT_SECRET_HEADER),
                ]),
        )
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Service is unhealthy")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<axum::Json<serde_json::Value>, AppError> {
    db::health_check(&state.pool).await.map_err(|e| {
        tracing::error!(error = %e, "PostgreSQL health check failed");
        AppError::DatabaseError(anyhow::Error::new(e))
    })?;

    state.cache.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Redis health check failed");
        AppError::from(e)
    })?;

    Ok(axum::Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "postgres": "up",
            "redis": "up"
        }
    })))
}
