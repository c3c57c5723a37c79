//! Service registry model - client credentials for service-to-service auth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::utils::make_bearer;

pub const CLIENT_ID_LEN: usize = 24;
pub const CLIENT_SECRET_LEN: usize = 32;

/// Request metadata keys carrying the caller's credential.
pub const CLIENT_ID_HEADER: &str = "client-id";
pub const CLIENT_SECRET_HEADER: &str = "client-secret";

/// Client id + secret pair, generated once at service creation and compared
/// by exact match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Credential {
    pub client_id: String,
    pub client_secret: String,
}

impl Credential {
    pub fn random() -> Self {
        Self {
            client_id: make_bearer(CLIENT_ID_LEN),
            client_secret: make_bearer(CLIENT_SECRET_LEN),
        }
    }

    pub fn validate(&self, client_secret: &str) -> bool {
        self.client_secret == client_secret
    }
}

/// A registered internal service.
#[derive(Debug, Clone, FromRow)]
pub struct Service {
    pub service_id: String,
    pub name: String,
    pub domain: String,
    pub namespace: String,
    pub client_id: String,
    pub client_secret: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Service {
    pub fn credential(&self) -> Credential {
        Credential {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
        }
    }
}
