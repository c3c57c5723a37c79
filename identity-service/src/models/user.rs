//! User model - the identity record consumed by the directory contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

pub const DEFAULT_DOMAIN: &str = "default";

/// Privilege tier. Primary and Super users bypass the accessible-namespace
/// restriction when switching namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    Sub,
    Primary,
    Super,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Sub => "sub",
            UserType::Primary => "primary",
            UserType::Super => "super",
        }
    }

    /// Whether this tier may enter any namespace under its domain.
    pub fn is_privileged(&self) -> bool {
        matches!(self, UserType::Primary | UserType::Super)
    }
}

impl std::str::FromStr for UserType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sub" => Ok(UserType::Sub),
            "primary" => Ok(UserType::Primary),
            "super" => Ok(UserType::Super),
            other => Err(format!("unknown user type: {}", other)),
        }
    }
}

/// User row as stored by the identity directory.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: String,
    pub domain: String,
    pub username: String,
    pub user_type: String,
    pub password_hash: String,
    pub password_updated_at: DateTime<Utc>,
    /// Days until the password expires; 0 means never.
    pub password_expired_days: i32,
    /// Days before expiry at which a reset reminder kicks in.
    pub password_remind_days: i32,
    pub locked: bool,
    pub created_at: DateTime<Utc>,
}

/// Identity facts the token engine needs, minus anything sensitive.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserIdentity {
    pub user_id: String,
    pub username: String,
    pub domain: String,
    pub user_type: UserType,
    /// Set when the password is inside its reminder window.
    pub password_needs_reset: bool,
}

/// Split `name@domain` into its parts, defaulting the domain when absent.
pub fn split_user_and_domain(username: &str) -> (&str, &str) {
    match username.split_once('@') {
        Some((user, domain)) if !domain.is_empty() => (user, domain),
        _ => (username, DEFAULT_DOMAIN),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_user_and_domain() {
        assert_eq!(split_user_and_domain("alice@corp"), ("alice", "corp"));
        assert_eq!(split_user_and_domain("alice"), ("alice", DEFAULT_DOMAIN));
        assert_eq!(split_user_and_domain("alice@"), ("alice@", DEFAULT_DOMAIN));
    }

    #[test]
    fn test_privilege_tiers() {
        assert!(UserType::Primary.is_privileged());
        assert!(UserType::Super.is_privileged());
        assert!(!UserType::Sub.is_privileged());
    }

    #[test]
    fn test_user_type_round_trip() {
        for ut in [UserType::Sub, UserType::Primary, UserType::Super] {
            assert_eq!(ut.as_str().parse::<UserType>().unwrap(), ut);
        }
    }
}
