//! Token model - the persisted session record.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::user::UserType;
use crate::utils::make_bearer;

pub const ACCESS_TOKEN_LEN: usize = 24;
pub const REFRESH_TOKEN_LEN: usize = 32;

pub const DEFAULT_NAMESPACE: &str = "default";

/// Authentication method used to request a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    Password,
    PrivateToken,
    Ldap,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::Password => "password",
            GrantType::PrivateToken => "private_token",
            GrantType::Ldap => "ldap",
        }
    }
}

impl std::str::FromStr for GrantType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "password" => Ok(GrantType::Password),
            "private_token" => Ok(GrantType::PrivateToken),
            "ldap" => Ok(GrantType::Ldap),
            other => Err(format!("unknown grant type: {}", other)),
        }
    }
}

/// Client platform a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Web,
    Mobile,
    Api,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Web => "web",
            Platform::Mobile => "mobile",
            Platform::Api => "api",
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(Platform::Web),
            "mobile" => Ok(Platform::Mobile),
            "api" => Ok(Platform::Api),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

/// Why a token was frozen. The record is kept for audit, never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    RefreshTokenExpired,
    OtherPlaceLoggedIn,
    OtherIpLoggedIn,
    PendingStepUp,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::RefreshTokenExpired => "refresh_token_expired",
            BlockReason::OtherPlaceLoggedIn => "other_place_logged_in",
            BlockReason::OtherIpLoggedIn => "other_ip_logged_in",
            BlockReason::PendingStepUp => "pending_step_up",
        }
    }
}

impl std::str::FromStr for BlockReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "refresh_token_expired" => Ok(BlockReason::RefreshTokenExpired),
            "other_place_logged_in" => Ok(BlockReason::OtherPlaceLoggedIn),
            "other_ip_logged_in" => Ok(BlockReason::OtherIpLoggedIn),
            "pending_step_up" => Ok(BlockReason::PendingStepUp),
            other => Err(format!("unknown block reason: {}", other)),
        }
    }
}

/// Mutable session state, a tagged variant rather than loose flags so the
/// validation state machine stays exhaustive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TokenStatus {
    Active,
    Blocked { reason: BlockReason, detail: String },
}

impl TokenStatus {
    pub fn is_blocked(&self) -> bool {
        matches!(self, TokenStatus::Blocked { .. })
    }
}

/// A session record. Expiry fields are epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
    pub username: String,
    pub domain: String,
    pub user_type: UserType,
    pub namespace: String,
    /// Derived on describe from the policy engine, never persisted.
    #[serde(default)]
    pub available_namespaces: Vec<String>,
    pub platform: Platform,
    pub grant_type: GrantType,
    pub access_expired_at: i64,
    pub refresh_expired_at: i64,
    pub status: TokenStatus,
    pub created_at: i64,
    pub updated_at: i64,
    /// Source address recorded at issuance, consulted by the other-place check.
    pub login_ip: String,
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl Token {
    /// Mint a fresh session skeleton. Issuers fill identity fields in and
    /// the lifecycle manager persists the result.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: impl Into<String>,
        username: impl Into<String>,
        domain: impl Into<String>,
        user_type: UserType,
        namespace: impl Into<String>,
        platform: Platform,
        grant_type: GrantType,
        access_ttl_secs: i64,
        refresh_ttl_secs: i64,
        login_ip: impl Into<String>,
    ) -> Self {
        let now = now_millis();
        Self {
            access_token: make_bearer(ACCESS_TOKEN_LEN),
            refresh_token: make_bearer(REFRESH_TOKEN_LEN),
            user_id: user_id.into(),
            username: username.into(),
            domain: domain.into(),
            user_type,
            namespace: namespace.into(),
            available_namespaces: Vec::new(),
            platform,
            grant_type,
            access_expired_at: now + access_ttl_secs * 1000,
            refresh_expired_at: now + refresh_ttl_secs * 1000,
            status: TokenStatus::Active,
            created_at: now,
            updated_at: now,
            login_ip: login_ip.into(),
        }
    }

    pub fn is_access_expired(&self) -> bool {
        self.access_expired_at <= now_millis()
    }

    pub fn is_refresh_expired(&self) -> bool {
        self.refresh_expired_at <= now_millis()
    }

    /// Silent renewal: the access window restarts from now, while the
    /// refresh window extends from its original expiry instant. Repeated
    /// rapid validations therefore advance the refresh deadline by exactly
    /// one window, not one per call.
    pub fn renew(&mut self, access_ttl_secs: i64, refresh_ttl_secs: i64) {
        let now = now_millis();
        self.access_expired_at = now + access_ttl_secs * 1000;
        self.refresh_expired_at += refresh_ttl_secs * 1000;
        self.updated_at = now;
    }

    /// Freeze the token in place. Blocked tokens fail validation but stay
    /// on record as login history.
    pub fn block(&mut self, reason: BlockReason, detail: impl Into<String>) {
        self.status = TokenStatus::Blocked {
            reason,
            detail: detail.into(),
        };
        self.updated_at = now_millis();
    }

    pub fn is_blocked(&self) -> bool {
        self.status.is_blocked()
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.available_namespaces.iter().any(|n| n == namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_token() -> Token {
        Token::new(
            "u-1", "alice", "default",
            UserType::Sub,
            "ns-default",
            Platform::Web,
            GrantType::Password,
            3600,
            4 * 3600,
            "10.0.0.1",
        )
    }

    #[test]
    fn test_new_token_expiry_monotonic() {
        let tk = sample_token();
        assert!(tk.access_expired_at <= tk.refresh_expired_at);
        assert!(!tk.is_access_expired());
        assert!(!tk.is_refresh_expired());
    }

    #[test]
    fn test_renew_extends_refresh_from_original_instant() {
        let mut tk = sample_token();
        let original_refresh = tk.refresh_expired_at;

        tk.renew(3600, 4 * 3600);
        assert_eq!(tk.refresh_expired_at, original_refresh + 4 * 3600 * 1000);
        assert!(tk.access_expired_at <= tk.refresh_expired_at);
    }

    #[test]
    fn test_block_keeps_record() {
        let mut tk = sample_token();
        tk.block(BlockReason::OtherPlaceLoggedIn, "newer web login");

        assert!(tk.is_blocked());
        match &tk.status {
            TokenStatus::Blocked { reason, .. } => {
                assert_eq!(*reason, BlockReason::OtherPlaceLoggedIn)
            }
            TokenStatus::Active => panic!("expected blocked"),
        }
    }

    #[test]
    fn test_grant_type_round_trip() {
        for gt in [GrantType::Password, GrantType::PrivateToken, GrantType::Ldap] {
            assert_eq!(gt.as_str().parse::<GrantType>().unwrap(), gt);
        }
        assert!("magic_link".parse::<GrantType>().is_err());
    }

    #[test]
    fn test_has_namespace() {
        let mut tk = sample_token();
        tk.available_namespaces = vec!["ns-a".to_string()];
        assert!(tk.has_namespace("ns-a"));
        assert!(!tk.has_namespace("ns-b"));
    }
}
