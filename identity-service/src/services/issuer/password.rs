//! Password grant: verify username/password against the identity directory.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::TokenConfig;
use crate::dtos::token::IssueTokenRequest;
use crate::models::{split_user_and_domain, GrantType, Token, DEFAULT_NAMESPACE};
use crate::services::directory::IdentityDirectory;
use crate::services::issuer::TokenIssuer;
use crate::services::ServiceError;
use crate::utils::Password;

pub struct PasswordIssuer {
    directory: Arc<dyn IdentityDirectory>,
    token_cfg: TokenConfig,
}

impl PasswordIssuer {
    pub fn new(directory: Arc<dyn IdentityDirectory>, token_cfg: TokenConfig) -> Self {
        Self {
            directory,
            token_cfg,
        }
    }
}

#[async_trait]
impl TokenIssuer for PasswordIssuer {
    async fn issue_token(&self, req: &IssueTokenRequest) -> Result<Token, ServiceError> {
        if req.username.is_empty() || req.password.is_empty() {
            return Err(ServiceError::BadRequest(
                "username and password are required for the password grant".to_string(),
            ));
        }

        let (username, domain) = split_user_and_domain(&req.username);
        let identity = self
            .directory
            .verify_password(domain, username, &Password::new(req.password.clone()))
            .await?;

        if identity.password_needs_reset {
            tracing::info!(username = %identity.username, "password inside reminder window");
        }

        Ok(Token::new(
            identity.user_id,
            identity.username,
            identity.domain,
            identity.user_type,
            DEFAULT_NAMESPACE,
            req.platform,
            GrantType::Password,
            self.token_cfg.access_ttl_secs,
            self.token_cfg.refresh_ttl_secs,
            req.client_ip.clone(),
        ))
    }
}
