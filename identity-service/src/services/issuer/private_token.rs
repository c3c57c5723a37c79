//! Private-token grant: exchange a long-lived pre-shared API token for a
//! fresh session, e.g. for automation users.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::TokenConfig;
use crate::dtos::token::IssueTokenRequest;
use crate::models::{GrantType, Platform, Token};
use crate::services::issuer::TokenIssuer;
use crate::services::store::SessionStore;
use crate::services::ServiceError;

pub struct PrivateTokenIssuer {
    store: Arc<dyn SessionStore>,
    token_cfg: TokenConfig,
}

impl PrivateTokenIssuer {
    pub fn new(store: Arc<dyn SessionStore>, token_cfg: TokenConfig) -> Self {
        Self { store, token_cfg }
    }
}

#[async_trait]
impl TokenIssuer for PrivateTokenIssuer {
    async fn issue_token(&self, req: &IssueTokenRequest) -> Result<Token, ServiceError> {
        if req.private_token.is_empty() {
            return Err(ServiceError::BadRequest(
                "private_token is required for the private token grant".to_string(),
            ));
        }

        let source = self
            .store
            .get(&req.private_token)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("private token not found".to_string()))?;

        // Only API-platform tokens may act as pre-shared credentials.
        if source.platform != Platform::Api {
            return Err(ServiceError::Unauthorized(
                "token is not a private api token".to_string(),
            ));
        }
        if source.is_blocked() {
            return Err(ServiceError::Unauthorized("private token is blocked".to_string()));
        }
        if source.is_refresh_expired() {
            return Err(ServiceError::Unauthorized("private token has expired".to_string()));
        }

        // Re-stamp a fresh session for the same identity; the source token
        // keeps its own lifetime.
        Ok(Token::new(
            source.user_id,
            source.username,
            source.domain,
            source.user_type,
            source.namespace,
            req.platform,
            GrantType::PrivateToken,
            self.token_cfg.access_ttl_secs,
            self.token_cfg.refresh_ttl_secs,
            req.client_ip.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserType;
    use crate::services::store::MemorySessionStore;

    fn api_token() -> Token {
        Token::new(
            "u-9",
            "robot",
            "default",
            UserType::Sub,
            "ns-default",
            Platform::Api,
            GrantType::Password,
            3600,
            30 * 24 * 3600,
            "10.0.0.9",
        )
    }

    #[tokio::test]
    async fn test_exchanges_api_token() {
        let store = Arc::new(MemorySessionStore::new());
        let source = api_token();
        store.save(&source).await.unwrap();

        let issuer = PrivateTokenIssuer::new(store, TokenConfig::default());
        let req = IssueTokenRequest::private_token_grant(&source.access_token);

        let tk = issuer.issue_token(&req).await.unwrap();
        assert_eq!(tk.user_id, "u-9");
        assert_eq!(tk.grant_type, GrantType::PrivateToken);
        assert_ne!(tk.access_token, source.access_token);
    }

    #[tokio::test]
    async fn test_rejects_unknown_private_token() {
        let issuer =
            PrivateTokenIssuer::new(Arc::new(MemorySessionStore::new()), TokenConfig::default());
        let req = IssueTokenRequest::private_token_grant("nonexistent");

        assert!(matches!(
            issuer.issue_token(&req).await,
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_web_token_as_private() {
        let store = Arc::new(MemorySessionStore::new());
        let mut source = api_token();
        source.platform = Platform::Web;
        store.save(&source).await.unwrap();

        let issuer = PrivateTokenIssuer::new(store, TokenConfig::default());
        let req = IssueTokenRequest::private_token_grant(&source.access_token);

        assert!(matches!(
            issuer.issue_token(&req).await,
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_blocked_private_token() {
        let store = Arc::new(MemorySessionStore::new());
        let mut source = api_token();
        source.block(crate::models::BlockReason::OtherPlaceLoggedIn, "test");
        store.save(&source).await.unwrap();

        let issuer = PrivateTokenIssuer::new(store, TokenConfig::default());
        let req = IssueTokenRequest::private_token_grant(&source.access_token);

        assert!(matches!(
            issuer.issue_token(&req).await,
            Err(ServiceError::Unauthorized(_))
        ));
    }
}
