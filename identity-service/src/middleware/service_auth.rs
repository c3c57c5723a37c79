//! Service-to-service authentication.
//!
//! Every token endpoint is called by another service on behalf of an end
//! user, never by the user directly. Callers identify themselves with a
//! `client-id`/`client-secret` header pair registered for their service.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::models::{CLIENT_ID_HEADER, CLIENT_SECRET_HEADER};
use crate::AppState;
use service_core::error::AppError;

pub async fn service_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client_id = header_value(&req, CLIENT_ID_HEADER);
    let client_secret = header_value(&req, CLIENT_SECRET_HEADER);

    let (client_id, client_secret) = match (client_id, client_secret) {
        (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => (id, secret),
        _ => {
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "client-id and client-secret headers are required"
            )))
        }
    };

    let service = state
        .credentials
        .validate(&client_id, &client_secret)
        .await?;
    tracing::debug!(service = %service.name, "service caller authenticated");

    // Downstream handlers can read the calling service from extensions.
    req.extensions_mut().insert(service);

    Ok(next.run(req).await)
}

fn header_value(req: &Request, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}
