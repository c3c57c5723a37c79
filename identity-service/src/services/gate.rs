//! Namespace access gate.

use crate::models::UserType;
use crate::services::ServiceError;

/// Decide whether an identity may switch its session into `namespace`.
/// Privileged user types bypass the per-namespace policy set.
pub fn check_namespace_access(
    user_type: UserType,
    accessible: &[String],
    namespace: &str,
) -> Result<(), ServiceError> {
    if user_type.is_privileged() {
        return Ok(());
    }
    if accessible.iter().any(|ns| ns == namespace) {
        return Ok(());
    }
    Err(ServiceError::PermissionDenied(format!(
        "no access to namespace {}",
        namespace
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_user_needs_policy_grant() {
        let accessible = vec!["ns-a".to_string(), "ns-b".to_string()];
        assert!(check_namespace_access(UserType::Sub, &accessible, "ns-a").is_ok());
        assert!(check_namespace_access(UserType::Sub, &accessible, "ns-c").is_err());
    }

    #[test]
    fn test_privileged_users_bypass_policy() {
        assert!(check_namespace_access(UserType::Primary, &[], "anything").is_ok());
        assert!(check_namespace_access(UserType::Super, &[], "anything").is_ok());
    }

    #[test]
    fn test_empty_grant_set_denies_sub_user() {
        assert!(check_namespace_access(UserType::Sub, &[], "ns-a").is_err());
    }
}
