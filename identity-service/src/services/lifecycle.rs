//! Session lifecycle orchestration: issue, validate, revoke, change
//! namespace, describe and query.
//!
//! `TokenService` is the only entry point the handlers talk to. It wires
//! the issuer registry, the security checker and the session store into
//! the documented flows and owns the cross-cutting rules (single live web
//! session, silent renewal, namespace restore).

use std::sync::Arc;

use crate::config::{SecuritySettings, TokenConfig};
use crate::dtos::token::{
    ChangeNamespaceRequest, IssueTokenRequest, QueryTokenRequest, RevokeTokenRequest, TokenSet,
};
use crate::models::{BlockReason, Platform, Token, TokenStatus};
use crate::services::cache::SecurityCache;
use crate::services::checker::SecurityChecker;
use crate::services::directory::{NamespaceDirectory, PolicyEngine};
use crate::services::gate::check_namespace_access;
use crate::services::issuer::IssuerRegistry;
use crate::services::store::SessionStore;
use crate::services::ServiceError;

/// Upper bound on policy rows consulted per user. A user attached to more
/// namespaces than this gets a truncated view and a warning in the logs.
pub const MAX_USER_POLICY: i64 = 100;

pub struct TokenService {
    store: Arc<dyn SessionStore>,
    registry: IssuerRegistry,
    checker: SecurityChecker,
    policy: Arc<dyn PolicyEngine>,
    namespaces: Arc<dyn NamespaceDirectory>,
    cache: Arc<dyn SecurityCache>,
    token_cfg: TokenConfig,
    security: SecuritySettings,
}

impl TokenService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SessionStore>,
        registry: IssuerRegistry,
        policy: Arc<dyn PolicyEngine>,
        namespaces: Arc<dyn NamespaceDirectory>,
        cache: Arc<dyn SecurityCache>,
        token_cfg: TokenConfig,
        security: SecuritySettings,
    ) -> Self {
        let checker = SecurityChecker::new(cache.clone(), store.clone(), security.clone());
        Self {
            store,
            registry,
            checker,
            policy,
            namespaces,
            cache,
            token_cfg,
            security,
        }
    }

    /// Full issuance pipeline: pre-check, grant-specific issuance,
    /// persistence, old-session eviction, post-check, namespace restore.
    pub async fn issue_token(&self, req: &IssueTokenRequest) -> Result<Token, ServiceError> {
        self.checker.before_login_check(req).await?;

        let issuer = self.registry.get(req.grant_type).ok_or_else(|| {
            ServiceError::BadRequest(format!(
                "grant type {} is not supported",
                req.grant_type.as_str()
            ))
        })?;

        let mut token = match issuer.issue_token(req).await {
            Ok(token) => {
                if !req.username.is_empty() {
                    self.cache.reset_login_failures(&req.username).await?;
                }
                token
            }
            Err(e) => {
                if matches!(e, ServiceError::Unauthorized(_)) && !req.username.is_empty() {
                    let failures = self
                        .cache
                        .incr_login_failure(&req.username, self.security.retry_window_secs)
                        .await?;
                    tracing::warn!(
                        username = %req.username,
                        failures,
                        "credential verification failed"
                    );
                }
                return Err(e);
            }
        };

        if !req.dry_run {
            self.store.save(&token).await?;

            if token.platform == Platform::Web {
                self.block_other_web_sessions(&token).await?;
            }
        }

        // Risk checks run even for dry runs, so a dry-run probe cannot
        // sidestep the step-up challenge a real login would face.
        if let Err(e) = self.checker.after_login_check(&req.verify_code, &token).await {
            if !req.dry_run {
                // The session stays on record but cannot be used until the
                // challenge is answered with a fresh login.
                token.block(BlockReason::PendingStepUp, e.to_string());
                self.store.save(&token).await?;
            }
            return Err(e);
        }

        if req.dry_run {
            return Ok(token);
        }

        if token.platform == Platform::Web {
            self.restore_namespace(&mut token).await?;
        }

        tracing::info!(
            user_id = %token.user_id,
            platform = %token.platform.as_str(),
            grant_type = %token.grant_type.as_str(),
            "token issued"
        );
        Ok(token)
    }

    /// A user holds at most one usable web session. Issuing a new one
    /// freezes every other active web session in place.
    async fn block_other_web_sessions(&self, current: &Token) -> Result<(), ServiceError> {
        let others = self
            .store
            .active_web_tokens(&current.user_id, &current.access_token)
            .await?;
        for mut other in others {
            other.block(
                BlockReason::OtherPlaceLoggedIn,
                format!("superseded by login from {}", current.login_ip),
            );
            self.store.save(&other).await?;
            tracing::info!(
                user_id = %current.user_id,
                blocked = %other.access_token,
                "blocked prior web session"
            );
        }
        Ok(())
    }

    /// Carry the working namespace over from the previous web session, so
    /// a re-login lands the user where they left off.
    async fn restore_namespace(&self, token: &mut Token) -> Result<(), ServiceError> {
        let previous = self
            .store
            .latest_for_user(&token.user_id, Platform::Web, &token.access_token)
            .await?;
        if let Some(prev) = previous {
            if !prev.namespace.is_empty() && prev.namespace != token.namespace {
                token.namespace = prev.namespace;
                self.store.save(token).await?;
            }
        }
        Ok(())
    }

    /// Resolve an access token to its session, renewing silently when only
    /// the access window has lapsed.
    pub async fn validate_token(&self, access_token: &str) -> Result<Token, ServiceError> {
        let mut token = self
            .store
            .get(access_token)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("token not found".to_string()))?;

        if let TokenStatus::Blocked { reason, detail } = &token.status {
            return Err(block_error(*reason, detail));
        }

        if token.is_access_expired() {
            if token.is_refresh_expired() {
                token.block(
                    BlockReason::RefreshTokenExpired,
                    "refresh window elapsed".to_string(),
                );
                self.store.save(&token).await?;
                return Err(ServiceError::SessionTerminated(
                    "session expired, login again".to_string(),
                ));
            }
            token.renew(
                self.token_cfg.access_ttl_secs,
                self.token_cfg.refresh_ttl_secs,
            );
            self.store.save(&token).await?;
            tracing::debug!(user_id = %token.user_id, "access window renewed");
        }

        Ok(token)
    }

    /// Logout. The caller must present the matching refresh token; the
    /// access token alone is not proof of session ownership.
    pub async fn revoke_token(&self, req: &RevokeTokenRequest) -> Result<(), ServiceError> {
        let token = self
            .store
            .get(&req.access_token)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("token not found".to_string()))?;

        if token.refresh_token != req.refresh_token {
            return Err(ServiceError::BadRequest(
                "refresh token does not match".to_string(),
            ));
        }

        self.store.delete(&req.access_token).await?;
        tracing::info!(user_id = %token.user_id, "token revoked");
        Ok(())
    }

    /// Switch the session's working namespace, subject to the access gate.
    pub async fn change_namespace(
        &self,
        req: &ChangeNamespaceRequest,
    ) -> Result<Token, ServiceError> {
        let mut token = self
            .store
            .get(&req.access_token)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("token not found".to_string()))?;

        self.namespaces
            .describe_namespace(&token.domain, &req.namespace)
            .await?;

        if !token.user_type.is_privileged() {
            let page = self
                .policy
                .query_accessible_namespaces(&token.username, MAX_USER_POLICY)
                .await?;
            check_namespace_access(token.user_type, &page.namespaces, &req.namespace)?;
        }

        token.namespace = req.namespace.clone();
        self.store.save(&token).await?;
        Ok(token)
    }

    /// Resolve a session and decorate it with the namespaces its user can
    /// reach. Tokens over the policy bound get a truncated view.
    pub async fn describe_token(&self, access_token: &str) -> Result<Token, ServiceError> {
        let mut token = self
            .store
            .get(access_token)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("token not found".to_string()))?;

        let page = self
            .policy
            .query_accessible_namespaces(&token.username, MAX_USER_POLICY)
            .await?;
        if page.total > MAX_USER_POLICY {
            tracing::warn!(
                username = %token.username,
                total = page.total,
                "user policy count exceeds the describe bound, listing truncated"
            );
        }
        token.available_namespaces = page.namespaces;
        Ok(token)
    }

    /// Login history, paged newest first.
    pub async fn query_tokens(&self, req: &QueryTokenRequest) -> Result<TokenSet, ServiceError> {
        self.store.query(req).await
    }
}

/// A blocked token maps to the error kind that tells the client what
/// happened to its session.
fn block_error(reason: BlockReason, detail: &str) -> ServiceError {
    match reason {
        BlockReason::RefreshTokenExpired => {
            ServiceError::SessionTerminated(format!("session expired: {}", detail))
        }
        BlockReason::OtherPlaceLoggedIn => {
            ServiceError::OtherPlaceLoggedIn(format!("logged in elsewhere: {}", detail))
        }
        BlockReason::OtherIpLoggedIn => {
            ServiceError::OtherIpLoggedIn(format!("logged in from another address: {}", detail))
        }
        BlockReason::PendingStepUp => {
            ServiceError::VerifyCodeRequired(format!("verification pending: {}", detail))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GrantType, UserIdentity, UserType};
    use crate::services::cache::MemorySecurityCache;
    use crate::services::directory::{
        MockIdentityDirectory, MockNamespaceDirectory, MockPolicyEngine,
    };
    use crate::services::issuer::{PasswordIssuer, PrivateTokenIssuer};
    use crate::services::store::MemorySessionStore;

    struct Harness {
        service: TokenService,
        store: Arc<MemorySessionStore>,
        cache: Arc<MemorySecurityCache>,
        policy: Arc<MockPolicyEngine>,
        namespaces: Arc<MockNamespaceDirectory>,
    }

    fn harness() -> Harness {
        harness_with(TokenConfig::default(), SecuritySettings::default())
    }

    fn harness_with(token_cfg: TokenConfig, security: SecuritySettings) -> Harness {
        let store = Arc::new(MemorySessionStore::new());
        let cache = Arc::new(MemorySecurityCache::new());
        let policy = Arc::new(MockPolicyEngine::new());
        let namespaces = Arc::new(MockNamespaceDirectory::new());

        let directory = Arc::new(MockIdentityDirectory::new());
        directory.add_user(
            "correct-horse",
            UserIdentity {
                user_id: "u-1".to_string(),
                username: "alice".to_string(),
                domain: "default".to_string(),
                user_type: UserType::Sub,
                password_needs_reset: false,
            },
        );

        let mut registry = IssuerRegistry::new();
        registry.register(
            GrantType::Password,
            Arc::new(PasswordIssuer::new(directory, token_cfg.clone())),
        );
        registry.register(
            GrantType::PrivateToken,
            Arc::new(PrivateTokenIssuer::new(store.clone(), token_cfg.clone())),
        );

        let service = TokenService::new(
            store.clone(),
            registry,
            policy.clone(),
            namespaces.clone(),
            cache.clone(),
            token_cfg,
            security,
        );
        Harness {
            service,
            store,
            cache,
            policy,
            namespaces,
        }
    }

    fn login(ip: &str) -> IssueTokenRequest {
        IssueTokenRequest::password_grant("alice", "correct-horse").with_client_ip(ip)
    }

    #[tokio::test]
    async fn test_issue_and_validate() {
        let h = harness();
        let token = h.service.issue_token(&login("10.0.0.1")).await.unwrap();
        assert_eq!(token.user_id, "u-1");
        assert!(!token.is_blocked());

        let resolved = h.service.validate_token(&token.access_token).await.unwrap();
        assert_eq!(resolved.access_token, token.access_token);
    }

    #[tokio::test]
    async fn test_unknown_grant_type_is_bad_request() {
        let h = harness();
        let mut req = login("10.0.0.1");
        req.grant_type = GrantType::Ldap;
        assert!(matches!(
            h.service.issue_token(&req).await,
            Err(ServiceError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_dry_run_persists_nothing() {
        let h = harness();
        let mut req = login("10.0.0.1");
        req.dry_run = true;
        let token = h.service.issue_token(&req).await.unwrap();
        assert!(h.store.get(&token.access_token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dry_run_still_faces_risk_checks() {
        let h = harness();
        h.service.issue_token(&login("10.0.0.1")).await.unwrap();

        // A dry run from a new location is challenged exactly like a real
        // login would be.
        let mut req = login("198.51.100.7");
        req.dry_run = true;
        let err = h.service.issue_token(&req).await.unwrap_err();
        assert!(matches!(err, ServiceError::VerifyCodeRequired(_)));

        // Nothing new was persisted and the existing session is untouched.
        let set = h
            .service
            .query_tokens(&QueryTokenRequest {
                user_id: Some("u-1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(set.total, 1);
        assert!(!set.items[0].is_blocked());
    }

    #[tokio::test]
    async fn test_failed_logins_count_then_lock_out() {
        let h = harness();
        let mut req = login("10.0.0.1");
        req.password = "wrong".to_string();
        for _ in 0..5 {
            assert!(matches!(
                h.service.issue_token(&req).await,
                Err(ServiceError::Unauthorized(_))
            ));
        }
        // Sixth attempt is rejected before credentials are even looked at.
        assert!(matches!(
            h.service.issue_token(&req).await,
            Err(ServiceError::BadRequest(_))
        ));

        assert_eq!(h.cache.login_failures("alice").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_successful_login_resets_failure_counter() {
        let h = harness();
        let mut bad = login("10.0.0.1");
        bad.password = "wrong".to_string();
        let _ = h.service.issue_token(&bad).await;
        let _ = h.service.issue_token(&bad).await;

        h.service.issue_token(&login("10.0.0.1")).await.unwrap();
        assert_eq!(h.cache.login_failures("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_new_web_login_blocks_prior_web_session() {
        let h = harness();
        let first = h.service.issue_token(&login("10.0.0.1")).await.unwrap();
        // Same address avoids the other-place challenge.
        let second = h.service.issue_token(&login("10.0.0.1")).await.unwrap();

        let err = h.service.validate_token(&first.access_token).await.unwrap_err();
        assert!(matches!(err, ServiceError::OtherPlaceLoggedIn(_)));

        assert!(h
            .service
            .validate_token(&second.access_token)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_api_sessions_may_coexist_with_web() {
        let h = harness();
        let web = h.service.issue_token(&login("10.0.0.1")).await.unwrap();
        let api = h
            .service
            .issue_token(&login("10.0.0.1").with_platform(Platform::Api))
            .await
            .unwrap();

        assert!(h.service.validate_token(&web.access_token).await.is_ok());
        assert!(h.service.validate_token(&api.access_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_login_from_new_place_demands_step_up() {
        let h = harness();
        h.service.issue_token(&login("10.0.0.1")).await.unwrap();

        let err = h
            .service
            .issue_token(&login("198.51.100.7"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::VerifyCodeRequired(_)));

        // A code was staged; replaying the login with it succeeds.
        let code = h.cache.get_verify_code("alice").await.unwrap().unwrap();
        let token = h
            .service
            .issue_token(&login("198.51.100.7").with_verify_code(&code))
            .await
            .unwrap();
        assert!(!token.is_blocked());
    }

    #[tokio::test]
    async fn test_pending_step_up_token_cannot_be_used() {
        let h = harness();
        h.service.issue_token(&login("10.0.0.1")).await.unwrap();
        let _ = h.service.issue_token(&login("198.51.100.7")).await;

        // The challenged session was persisted blocked; find it and check
        // that validation reports the pending challenge.
        let set = h
            .service
            .query_tokens(&QueryTokenRequest {
                user_id: Some("u-1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let pending = set
            .items
            .iter()
            .find(|t| matches!(
                t.status,
                TokenStatus::Blocked { reason: BlockReason::PendingStepUp, .. }
            ))
            .expect("challenged session should be on record");
        let err = h
            .service
            .validate_token(&pending.access_token)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::VerifyCodeRequired(_)));
    }

    #[tokio::test]
    async fn test_silent_renewal_extends_refresh_once_per_window() {
        let h = harness();
        let token = h.service.issue_token(&login("10.0.0.1")).await.unwrap();

        // Force the access window into the past while the refresh window
        // remains open.
        let mut stored = h.store.get(&token.access_token).await.unwrap().unwrap();
        stored.access_expired_at = crate::models::now_millis() - 1_000;
        let original_refresh = stored.refresh_expired_at;
        h.store.save(&stored).await.unwrap();

        let renewed = h.service.validate_token(&token.access_token).await.unwrap();
        assert!(!renewed.is_access_expired());
        assert_eq!(
            renewed.refresh_expired_at,
            original_refresh + TokenConfig::default().refresh_ttl_secs * 1000
        );
    }

    #[tokio::test]
    async fn test_expired_refresh_terminates_session() {
        let h = harness();
        let token = h.service.issue_token(&login("10.0.0.1")).await.unwrap();

        let mut stored = h.store.get(&token.access_token).await.unwrap().unwrap();
        stored.access_expired_at = crate::models::now_millis() - 2_000;
        stored.refresh_expired_at = crate::models::now_millis() - 1_000;
        h.store.save(&stored).await.unwrap();

        let err = h.service.validate_token(&token.access_token).await.unwrap_err();
        assert!(matches!(err, ServiceError::SessionTerminated(_)));

        // Termination is terminal: the session stays blocked afterwards.
        let err = h.service.validate_token(&token.access_token).await.unwrap_err();
        assert!(matches!(err, ServiceError::SessionTerminated(_)));
    }

    #[tokio::test]
    async fn test_validate_unknown_token_is_unauthorized() {
        let h = harness();
        assert!(matches!(
            h.service.validate_token("no-such-token").await,
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_revoke_requires_matching_refresh_token() {
        let h = harness();
        let token = h.service.issue_token(&login("10.0.0.1")).await.unwrap();

        let err = h
            .service
            .revoke_token(&RevokeTokenRequest {
                access_token: token.access_token.clone(),
                refresh_token: "not-the-one".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));

        h.service
            .revoke_token(&RevokeTokenRequest {
                access_token: token.access_token.clone(),
                refresh_token: token.refresh_token.clone(),
            })
            .await
            .unwrap();
        assert!(h.store.get(&token.access_token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_change_namespace_requires_policy_grant() {
        let h = harness();
        let token = h.service.issue_token(&login("10.0.0.1")).await.unwrap();
        h.namespaces.add_namespace("default", "ns-team");

        // No grant yet.
        let err = h
            .service
            .change_namespace(&ChangeNamespaceRequest {
                access_token: token.access_token.clone(),
                namespace: "ns-team".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(_)));

        h.policy.grant("alice", "ns-team");
        let switched = h
            .service
            .change_namespace(&ChangeNamespaceRequest {
                access_token: token.access_token.clone(),
                namespace: "ns-team".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(switched.namespace, "ns-team");
    }

    #[tokio::test]
    async fn test_change_namespace_unknown_namespace() {
        let h = harness();
        let token = h.service.issue_token(&login("10.0.0.1")).await.unwrap();
        h.policy.grant("alice", "ns-ghost");

        let err = h
            .service
            .change_namespace(&ChangeNamespaceRequest {
                access_token: token.access_token.clone(),
                namespace: "ns-ghost".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NamespaceNotFound(_)));
    }

    #[tokio::test]
    async fn test_relogin_restores_prior_namespace() {
        let h = harness();
        let first = h.service.issue_token(&login("10.0.0.1")).await.unwrap();
        h.namespaces.add_namespace("default", "ns-team");
        h.policy.grant("alice", "ns-team");
        h.service
            .change_namespace(&ChangeNamespaceRequest {
                access_token: first.access_token.clone(),
                namespace: "ns-team".to_string(),
            })
            .await
            .unwrap();

        let second = h.service.issue_token(&login("10.0.0.1")).await.unwrap();
        assert_eq!(second.namespace, "ns-team");
    }

    #[tokio::test]
    async fn test_describe_lists_accessible_namespaces() {
        let h = harness();
        let token = h.service.issue_token(&login("10.0.0.1")).await.unwrap();
        h.policy.grant("alice", "ns-a");
        h.policy.grant("alice", "ns-b");

        let described = h.service.describe_token(&token.access_token).await.unwrap();
        assert!(described.has_namespace("ns-a"));
        assert!(described.has_namespace("ns-b"));
    }

    #[tokio::test]
    async fn test_describe_over_policy_bound_still_succeeds() {
        let h = harness();
        let token = h.service.issue_token(&login("10.0.0.1")).await.unwrap();
        h.policy.grant("alice", "ns-a");
        *h.policy.total_override.lock().unwrap() = Some(MAX_USER_POLICY + 50);

        let described = h.service.describe_token(&token.access_token).await.unwrap();
        assert!(described.has_namespace("ns-a"));
    }

    #[tokio::test]
    async fn test_private_token_grant_spawns_api_session() {
        let h = harness();
        let seed = h
            .service
            .issue_token(&login("10.0.0.1").with_platform(Platform::Api))
            .await
            .unwrap();

        let req = IssueTokenRequest::private_token_grant(&seed.access_token)
            .with_client_ip("10.0.0.2");
        let spawned = h.service.issue_token(&req).await.unwrap();
        assert_eq!(spawned.user_id, seed.user_id);
        assert_eq!(spawned.grant_type, GrantType::PrivateToken);
        assert_ne!(spawned.access_token, seed.access_token);

        // The seed session is untouched.
        assert!(h.service.validate_token(&seed.access_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_query_filters_by_platform() {
        let h = harness();
        h.service.issue_token(&login("10.0.0.1")).await.unwrap();
        h.service
            .issue_token(&login("10.0.0.1").with_platform(Platform::Api))
            .await
            .unwrap();

        let set = h
            .service
            .query_tokens(&QueryTokenRequest {
                user_id: Some("u-1".to_string()),
                platform: Some(Platform::Api),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(set.total, 1);
        assert_eq!(set.items[0].platform, Platform::Api);
    }
}
