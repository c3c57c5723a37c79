//! Collaborator contracts: identity directory, policy engine, namespace
//! directory. The token engine only ever sees these traits; production
//! implementations are Postgres-backed, tests use the in-memory mocks.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::postgres::PgPool;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::models::{User, UserIdentity, UserType};
use crate::services::ServiceError;
use crate::utils::{verify_password, Password};

/// Identity verification contract.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Check a password grant. Unknown user or wrong password is
    /// `Unauthorized`; an expired password is `PasswordExpired` so the
    /// caller can route the user to a reset flow.
    async fn verify_password(
        &self,
        domain: &str,
        username: &str,
        password: &Password,
    ) -> Result<UserIdentity, ServiceError>;
}

/// Policy lookup contract: which namespaces can this user reach.
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    async fn query_accessible_namespaces(
        &self,
        username: &str,
        page_size: i64,
    ) -> Result<NamespacePage, ServiceError>;
}

/// One page of namespace-scoped policy results.
#[derive(Debug, Clone)]
pub struct NamespacePage {
    pub namespaces: Vec<String>,
    pub total: i64,
}

/// Namespace existence contract.
#[async_trait]
pub trait NamespaceDirectory: Send + Sync {
    /// Ok when the namespace exists under the domain, `NamespaceNotFound`
    /// otherwise.
    async fn describe_namespace(&self, domain: &str, name: &str) -> Result<(), ServiceError>;
}

/// Postgres-backed identity directory over the `users` table.
#[derive(Clone)]
pub struct PgIdentityDirectory {
    pool: PgPool,
}

impl PgIdentityDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityDirectory for PgIdentityDirectory {
    async fn verify_password(
        &self,
        domain: &str,
        username: &str,
        password: &Password,
    ) -> Result<UserIdentity, ServiceError> {
        let user: Option<User> =
            sqlx::query_as("SELECT * FROM users WHERE domain = $1 AND username = $2")
                .bind(domain)
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;

        let user = user.ok_or_else(|| {
            ServiceError::Unauthorized("user or password not correct".to_string())
        })?;

        if user.locked {
            return Err(ServiceError::PermissionDenied(format!(
                "user {} is locked",
                username
            )));
        }

        verify_password(password, &user.password_hash).map_err(|_| {
            ServiceError::Unauthorized("user or password not correct".to_string())
        })?;

        let needs_reset = check_password_expiry(
            user.password_updated_at,
            user.password_expired_days,
            user.password_remind_days,
        )?;

        let user_type: UserType = user
            .user_type
            .parse()
            .map_err(|e: String| ServiceError::Internal(anyhow::anyhow!(e)))?;

        Ok(UserIdentity {
            user_id: user.user_id,
            username: user.username,
            domain: user.domain,
            user_type,
            password_needs_reset: needs_reset,
        })
    }
}

/// Evaluate the password-age policy. Returns whether the password is inside
/// its reminder window; an already-expired password is an error.
/// `expired_days` of zero means the password never expires.
pub fn check_password_expiry(
    updated_at: chrono::DateTime<Utc>,
    expired_days: i32,
    remind_days: i32,
) -> Result<bool, ServiceError> {
    if expired_days == 0 {
        return Ok(false);
    }

    let expires_at = updated_at + Duration::days(expired_days as i64);
    let now = Utc::now();

    if now >= expires_at {
        let over = (now - expires_at).num_days();
        return Err(ServiceError::PasswordExpired(format!(
            "password expired {} days ago",
            over
        )));
    }

    Ok(now >= expires_at - Duration::days(remind_days as i64))
}

/// Postgres-backed policy engine over the `policies` table.
#[derive(Clone)]
pub struct PgPolicyEngine {
    pool: PgPool,
}

impl PgPolicyEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PolicyEngine for PgPolicyEngine {
    async fn query_accessible_namespaces(
        &self,
        username: &str,
        page_size: i64,
    ) -> Result<NamespacePage, ServiceError> {
        let namespaces: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT namespace FROM policies
            WHERE username = $1
            ORDER BY namespace
            LIMIT $2
            "#,
        )
        .bind(username)
        .bind(page_size)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM policies WHERE username = $1")
                .bind(username)
                .fetch_one(&self.pool)
                .await?;

        Ok(NamespacePage { namespaces, total })
    }
}

/// Postgres-backed namespace directory over the `namespaces` table.
#[derive(Clone)]
pub struct PgNamespaceDirectory {
    pool: PgPool,
}

impl PgNamespaceDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NamespaceDirectory for PgNamespaceDirectory {
    async fn describe_namespace(&self, domain: &str, name: &str) -> Result<(), ServiceError> {
        let exists: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM namespaces WHERE domain = $1 AND name = $2",
        )
        .bind(domain)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        match exists {
            Some(_) => Ok(()),
            None => Err(ServiceError::NamespaceNotFound(format!(
                "{}/{}",
                domain, name
            ))),
        }
    }
}

// ---- test doubles ----

/// In-memory identity directory.
pub struct MockIdentityDirectory {
    users: Mutex<HashMap<(String, String), (String, UserIdentity)>>,
}

impl MockIdentityDirectory {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_user(&self, password: &str, identity: UserIdentity) {
        self.users.lock().unwrap().insert(
            (identity.domain.clone(), identity.username.clone()),
            (password.to_string(), identity),
        );
    }
}

impl Default for MockIdentityDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityDirectory for MockIdentityDirectory {
    async fn verify_password(
        &self,
        domain: &str,
        username: &str,
        password: &Password,
    ) -> Result<UserIdentity, ServiceError> {
        let users = self.users.lock().unwrap();
        match users.get(&(domain.to_string(), username.to_string())) {
            Some((stored, identity)) if stored == password.as_str() => Ok(identity.clone()),
            _ => Err(ServiceError::Unauthorized(
                "user or password not correct".to_string(),
            )),
        }
    }
}

/// In-memory policy engine.
pub struct MockPolicyEngine {
    grants: Mutex<HashMap<String, Vec<String>>>,
    /// Override the reported total, to exercise the over-bound warning path.
    pub total_override: Mutex<Option<i64>>,
}

impl MockPolicyEngine {
    pub fn new() -> Self {
        Self {
            grants: Mutex::new(HashMap::new()),
            total_override: Mutex::new(None),
        }
    }

    pub fn grant(&self, username: &str, namespace: &str) {
        self.grants
            .lock()
            .unwrap()
            .entry(username.to_string())
            .or_default()
            .push(namespace.to_string());
    }
}

impl Default for MockPolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyEngine for MockPolicyEngine {
    async fn query_accessible_namespaces(
        &self,
        username: &str,
        page_size: i64,
    ) -> Result<NamespacePage, ServiceError> {
        let grants = self.grants.lock().unwrap();
        let namespaces: Vec<String> = grants
            .get(username)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .take(page_size as usize)
            .collect();
        let total = self
            .total_override
            .lock()
            .unwrap()
            .unwrap_or(namespaces.len() as i64);
        Ok(NamespacePage { namespaces, total })
    }
}

/// In-memory namespace directory.
pub struct MockNamespaceDirectory {
    existing: Mutex<HashSet<(String, String)>>,
}

impl MockNamespaceDirectory {
    pub fn new() -> Self {
        Self {
            existing: Mutex::new(HashSet::new()),
        }
    }

    pub fn add_namespace(&self, domain: &str, name: &str) {
        self.existing
            .lock()
            .unwrap()
            .insert((domain.to_string(), name.to_string()));
    }
}

impl Default for MockNamespaceDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NamespaceDirectory for MockNamespaceDirectory {
    async fn describe_namespace(&self, domain: &str, name: &str) -> Result<(), ServiceError> {
        let existing = self.existing.lock().unwrap();
        if existing.contains(&(domain.to_string(), name.to_string())) {
            Ok(())
        } else {
            Err(ServiceError::NamespaceNotFound(format!(
                "{}/{}",
                domain, name
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_never_expires_when_zero_days() {
        let old = Utc::now() - Duration::days(3650);
        assert!(!check_password_expiry(old, 0, 30).unwrap());
    }

    #[test]
    fn test_password_expired() {
        let updated = Utc::now() - Duration::days(120);
        let err = check_password_expiry(updated, 90, 30).unwrap_err();
        assert!(matches!(err, ServiceError::PasswordExpired(_)));
    }

    #[test]
    fn test_password_inside_remind_window() {
        let updated = Utc::now() - Duration::days(70);
        // Expires at day 90, remind from day 60 onwards.
        assert!(check_password_expiry(updated, 90, 30).unwrap());
    }

    #[test]
    fn test_password_fresh() {
        let updated = Utc::now() - Duration::days(10);
        assert!(!check_password_expiry(updated, 90, 30).unwrap());
    }

    #[tokio::test]
    async fn test_mock_directory_verifies() {
        let dir = MockIdentityDirectory::new();
        dir.add_user(
            "secret",
            UserIdentity {
                user_id: "u-1".to_string(),
                username: "alice".to_string(),
                domain: "default".to_string(),
                user_type: UserType::Sub,
                password_needs_reset: false,
            },
        );

        assert!(dir
            .verify_password("default", "alice", &Password::new("secret"))
            .await
            .is_ok());
        assert!(matches!(
            dir.verify_password("default", "alice", &Password::new("wrong"))
                .await,
            Err(ServiceError::Unauthorized(_))
        ));
    }
}
