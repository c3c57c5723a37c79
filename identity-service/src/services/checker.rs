//! Login security checker: the guard pipelines around token issuance.
//!
//! Pre-issuance checks are cheap hard rejections that run before any
//! credential work. Post-issuance checks are risk heuristics that demand a
//! step-up code instead of failing outright, so an anomalous but genuine
//! user can still get in.

use rand::Rng;
use std::sync::Arc;

use crate::config::SecuritySettings;
use crate::dtos::token::IssueTokenRequest;
use crate::models::{Platform, Token};
use crate::services::cache::SecurityCache;
use crate::services::store::SessionStore;
use crate::services::ServiceError;

pub struct SecurityChecker {
    cache: Arc<dyn SecurityCache>,
    store: Arc<dyn SessionStore>,
    settings: SecuritySettings,
}

impl SecurityChecker {
    pub fn new(
        cache: Arc<dyn SecurityCache>,
        store: Arc<dyn SessionStore>,
        settings: SecuritySettings,
    ) -> Self {
        Self {
            cache,
            store,
            settings,
        }
    }

    /// Pre-issuance phase: first failing check aborts with its own kind.
    pub async fn before_login_check(&self, req: &IssueTokenRequest) -> Result<(), ServiceError> {
        self.max_failed_retry_check(&req.username).await?;
        self.ip_protect_check(&req.client_ip)?;
        tracing::debug!(username = %req.username, "pre-issuance security checks passed");
        Ok(())
    }

    /// Reject before credential verification when the identity has burned
    /// through its retry budget; keeps brute force away from the expensive
    /// password work.
    async fn max_failed_retry_check(&self, username: &str) -> Result<(), ServiceError> {
        if username.is_empty() {
            return Ok(());
        }
        let failures = self.cache.login_failures(username).await?;
        if failures >= self.settings.max_failed_retries {
            return Err(ServiceError::BadRequest(format!(
                "too many failed login attempts ({}), retry later",
                failures
            )));
        }
        Ok(())
    }

    fn ip_protect_check(&self, ip: &str) -> Result<(), ServiceError> {
        if ip.is_empty() {
            return Ok(());
        }
        if self.settings.ip_deny_list.iter().any(|d| d == ip) {
            return Err(ServiceError::BadRequest(format!(
                "login from {} is not permitted",
                ip
            )));
        }
        if !self.settings.ip_allow_list.is_empty()
            && !self.settings.ip_allow_list.iter().any(|a| a == ip)
        {
            return Err(ServiceError::BadRequest(format!(
                "login from {} is outside the allowed range",
                ip
            )));
        }
        Ok(())
    }

    /// Post-issuance phase. A supplied verification code is checked first
    /// and, when valid, satisfies every remaining risk check for this
    /// attempt. Without one, the other-place and dormancy heuristics may
    /// escalate to a step-up challenge.
    pub async fn after_login_check(
        &self,
        verify_code: &str,
        token: &Token,
    ) -> Result<(), ServiceError> {
        if !verify_code.is_empty() {
            return self.verify_code_check(&token.username, verify_code).await;
        }

        if let Err(e) = self.other_place_check(token).await {
            self.issue_step_up_challenge(&token.username).await?;
            return Err(e);
        }
        if let Err(e) = self.not_login_days_check(token).await {
            self.issue_step_up_challenge(&token.username).await?;
            return Err(e);
        }
        Ok(())
    }

    /// Credentials were already valid when this runs, so a bad code is a
    /// permission failure, not a bad request.
    async fn verify_code_check(&self, username: &str, code: &str) -> Result<(), ServiceError> {
        match self.cache.get_verify_code(username).await? {
            Some(active) if active == code => {
                self.cache.clear_verify_code(username).await?;
                tracing::debug!(username = %username, "step-up verification passed");
                Ok(())
            }
            _ => Err(ServiceError::PermissionDenied(
                "verification code is not valid".to_string(),
            )),
        }
    }

    /// Compare the new login's source against the most recent prior web
    /// session. A mismatch is not a hard failure; it demands step-up.
    async fn other_place_check(&self, token: &Token) -> Result<(), ServiceError> {
        let previous = self
            .store
            .latest_for_user(&token.user_id, Platform::Web, &token.access_token)
            .await?;

        match previous {
            Some(prev) if !prev.login_ip.is_empty() && prev.login_ip != token.login_ip => {
                Err(ServiceError::VerifyCodeRequired(format!(
                    "login location changed from {} to {}",
                    prev.login_ip, token.login_ip
                )))
            }
            _ => Ok(()),
        }
    }

    /// Demand step-up when the identity has been dormant past the window.
    async fn not_login_days_check(&self, token: &Token) -> Result<(), ServiceError> {
        let previous = self
            .store
            .latest_for_user(&token.user_id, Platform::Web, &token.access_token)
            .await?;

        if let Some(prev) = previous {
            let days_since = (crate::models::now_millis() - prev.created_at) / (24 * 3600 * 1000);
            if days_since >= self.settings.not_login_days {
                return Err(ServiceError::VerifyCodeRequired(format!(
                    "no login for {} days",
                    days_since
                )));
            }
        }
        Ok(())
    }

    /// Mint and stage a one-time code for the challenged identity.
    /// Delivery (SMS/mail) is a notification concern outside this service.
    async fn issue_step_up_challenge(&self, username: &str) -> Result<(), ServiceError> {
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
        self.cache
            .set_verify_code(username, &code, self.settings.verify_code_ttl_secs)
            .await?;
        tracing::info!(username = %username, "step-up verification code staged");
        Ok(())
    }
}
