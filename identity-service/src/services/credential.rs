//! Service-to-service credential validation.

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::postgres::PgPool;
use std::sync::Arc;

use crate::models::Service;
use crate::services::ServiceError;

/// Read-only view of the service registry's credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_client_id(&self, client_id: &str)
        -> Result<Option<Service>, ServiceError>;
}

#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_client_id(
        &self,
        client_id: &str,
    ) -> Result<Option<Service>, ServiceError> {
        let service: Option<Service> =
            sqlx::query_as("SELECT * FROM services WHERE client_id = $1")
                .bind(client_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(service)
    }
}

/// Validates client credentials, caching validated entries by client id.
///
/// Duplicate concurrent lookups on a cold key are harmless, merely
/// wasteful; no stampede protection is needed.
#[derive(Clone)]
pub struct CredentialValidator {
    store: Arc<dyn CredentialStore>,
    cache: Arc<DashMap<String, Service>>,
}

impl CredentialValidator {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Exact-match validation of a client id/secret pair.
    pub async fn validate(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Service, ServiceError> {
        if let Some(cached) = self.cache.get(client_id) {
            if cached.credential().validate(client_secret) {
                return Ok(cached.clone());
            }
            // Stale or wrong secret; fall through to a fresh lookup so a
            // rotated credential takes effect immediately.
            drop(cached);
            self.cache.remove(client_id);
        }

        let service = self
            .store
            .find_by_client_id(client_id)
            .await?
            .ok_or_else(|| {
                ServiceError::Unauthorized("client_id or client_secret not correct".to_string())
            })?;

        if !service.enabled {
            return Err(ServiceError::PermissionDenied(format!(
                "service {} is disabled",
                service.name
            )));
        }

        if !service.credential().validate(client_secret) {
            return Err(ServiceError::Unauthorized(
                "client_id or client_secret not correct".to_string(),
            ));
        }

        self.cache.insert(client_id.to_string(), service.clone());
        Ok(service)
    }
}

/// In-memory credential store for tests.
#[derive(Default)]
pub struct MockCredentialStore {
    services: std::sync::Mutex<Vec<Service>>,
}

impl MockCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_service(&self, service: Service) {
        self.services.lock().unwrap().push(service);
    }
}

#[async_trait]
impl CredentialStore for MockCredentialStore {
    async fn find_by_client_id(
        &self,
        client_id: &str,
    ) -> Result<Option<Service>, ServiceError> {
        Ok(self
            .services
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.client_id == client_id)
            .cloned())
    }
}
