//! Request/response shapes for the token endpoints.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::models::{GrantType, Platform, Token};

/// Login / grant request. Which fields matter depends on the grant type:
/// password grants read `username`/`password`, private-token grants read
/// `private_token`.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct IssueTokenRequest {
    pub grant_type: GrantType,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub private_token: String,
    /// Step-up verification code, when the caller is answering a challenge.
    #[serde(default)]
    pub verify_code: String,
    #[serde(default = "default_platform")]
    pub platform: Platform,
    /// Validate credentials only; nothing is persisted.
    #[serde(default)]
    pub dry_run: bool,
    /// Filled from the connection by the handler, not trusted from the body.
    #[serde(skip)]
    pub client_ip: String,
}

fn default_platform() -> Platform {
    Platform::Web
}

impl IssueTokenRequest {
    pub fn password_grant(username: &str, password: &str) -> Self {
        Self {
            grant_type: GrantType::Password,
            username: username.to_string(),
            password: password.to_string(),
            private_token: String::new(),
            verify_code: String::new(),
            platform: Platform::Web,
            dry_run: false,
            client_ip: String::new(),
        }
    }

    pub fn private_token_grant(private_token: &str) -> Self {
        Self {
            grant_type: GrantType::PrivateToken,
            username: String::new(),
            password: String::new(),
            private_token: private_token.to_string(),
            verify_code: String::new(),
            platform: Platform::Api,
            dry_run: false,
            client_ip: String::new(),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_client_ip(mut self, ip: &str) -> Self {
        self.client_ip = ip.to_string();
        self
    }

    pub fn with_verify_code(mut self, code: &str) -> Self {
        self.verify_code = code.to_string();
        self
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ValidateTokenRequest {
    #[validate(length(min = 1, message = "access_token is required"))]
    pub access_token: String,
}

/// Revocation needs both halves of the pair; a leaked access token alone
/// must not be enough to kill a session.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RevokeTokenRequest {
    #[validate(length(min = 1, message = "access_token is required"))]
    pub access_token: String,
    #[validate(length(min = 1, message = "refresh_token is required"))]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ChangeNamespaceRequest {
    #[validate(length(min = 1, message = "access_token is required"))]
    pub access_token: String,
    #[validate(length(min = 1, message = "namespace is required"))]
    pub namespace: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct DescribeTokenRequest {
    #[validate(length(min = 1, message = "access_token is required"))]
    pub access_token: String,
}

/// Login-history query. Paged; newest first.
#[derive(Debug, Clone, Deserialize, IntoParams, ToSchema)]
pub struct QueryTokenRequest {
    pub user_id: Option<String>,
    pub platform: Option<Platform>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_page_number")]
    pub page_number: u32,
}

fn default_page_size() -> u32 {
    20
}

fn default_page_number() -> u32 {
    1
}

impl Default for QueryTokenRequest {
    fn default() -> Self {
        Self {
            user_id: None,
            platform: None,
            page_size: default_page_size(),
            page_number: default_page_number(),
        }
    }
}

/// Largest login-history page a single read may return.
pub const MAX_PAGE_SIZE: u32 = 100;

impl QueryTokenRequest {
    /// Page size clamped to the read bound.
    pub fn limit(&self) -> u32 {
        self.page_size.min(MAX_PAGE_SIZE)
    }

    /// Rows to skip. Both factors are caller-controlled, so the math is
    /// widened past u32 instead of trusting it not to overflow.
    pub fn offset(&self) -> u64 {
        u64::from(self.limit()) * u64::from(self.page_number.saturating_sub(1))
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TokenSet {
    pub items: Vec<Token>,
    pub total: i64,
}

impl TokenSet {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }
}

impl Default for TokenSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_offset() {
        let mut q = QueryTokenRequest::default();
        assert_eq!(q.offset(), 0);
        q.page_number = 3;
        q.page_size = 10;
        assert_eq!(q.offset(), 20);
    }

    #[test]
    fn test_query_offset_clamps_and_never_overflows() {
        let q = QueryTokenRequest {
            page_size: u32::MAX,
            page_number: 3,
            ..Default::default()
        };
        assert_eq!(q.limit(), MAX_PAGE_SIZE);
        assert_eq!(q.offset(), u64::from(MAX_PAGE_SIZE) * 2);

        let q = QueryTokenRequest {
            page_size: MAX_PAGE_SIZE,
            page_number: u32::MAX,
            ..Default::default()
        };
        assert_eq!(q.offset(), u64::from(MAX_PAGE_SIZE) * u64::from(u32::MAX - 1));
    }

    #[test]
    fn test_issue_request_defaults_from_json() {
        let req: IssueTokenRequest = serde_json::from_str(
            r#"{"grant_type":"password","username":"alice","password":"pw"}"#,
        )
        .unwrap();
        assert_eq!(req.platform, Platform::Web);
        assert!(!req.dry_run);
        assert!(req.verify_code.is_empty());
    }
}
