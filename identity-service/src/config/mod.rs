use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

/// Default token lifetimes: one hour of access, four hours of refresh.
pub const DEFAULT_ACCESS_TTL_SECS: i64 = 3600;
pub const DEFAULT_REFRESH_TTL_SECS: i64 = 4 * 3600;

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub token: TokenConfig,
    pub security: SecuritySettings,
    pub allowed_origins: Vec<String>,
    pub swagger_enabled: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            other => Err(format!("unknown environment: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// Token lifetimes. Refresh must not be shorter than access or the expiry
/// invariant breaks on renewal.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TokenConfig {
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_ttl_secs: DEFAULT_ACCESS_TTL_SECS,
            refresh_ttl_secs: DEFAULT_REFRESH_TTL_SECS,
        }
    }
}

impl TokenConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.refresh_ttl_secs < self.access_ttl_secs {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "refresh ttl ({}s) must be >= access ttl ({}s)",
                self.refresh_ttl_secs,
                self.access_ttl_secs
            )));
        }
        Ok(())
    }
}

/// Thresholds and lists driving the login security checker.
#[derive(Debug, Clone, Deserialize)]
pub struct SecuritySettings {
    pub max_failed_retries: u32,
    pub retry_window_secs: i64,
    pub not_login_days: i64,
    /// Source IPs always rejected.
    pub ip_deny_list: Vec<String>,
    /// When non-empty, only these source IPs may log in.
    pub ip_allow_list: Vec<String>,
    pub verify_code_ttl_secs: i64,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            max_failed_retries: 5,
            retry_window_secs: 300,
            not_login_days: 30,
            ip_deny_list: Vec::new(),
            ip_allow_list: Vec::new(),
            verify_code_ttl_secs: 600,
        }
    }
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let is_prod = environment == Environment::Prod;

        let token = TokenConfig {
            access_ttl_secs: get_env_parsed(
                "TOKEN_ACCESS_TTL_SECS",
                Some(&DEFAULT_ACCESS_TTL_SECS.to_string()),
                is_prod,
            )?,
            refresh_ttl_secs: get_env_parsed(
                "TOKEN_REFRESH_TTL_SECS",
                Some(&DEFAULT_REFRESH_TTL_SECS.to_string()),
                is_prod,
            )?,
        };
        token.validate()?;

        Ok(IdentityConfig {
            common,
            environment,
            service_name: get_env("SERVICE_NAME", Some("identity-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: get_env_parsed("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
                min_connections: get_env_parsed("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", None, is_prod)?,
            },
            token,
            security: SecuritySettings {
                max_failed_retries: get_env_parsed("SECURITY_MAX_FAILED_RETRIES", Some("5"), is_prod)?,
                retry_window_secs: get_env_parsed("SECURITY_RETRY_WINDOW_SECS", Some("300"), is_prod)?,
                not_login_days: get_env_parsed("SECURITY_NOT_LOGIN_DAYS", Some("30"), is_prod)?,
                ip_deny_list: get_env_list("SECURITY_IP_DENY_LIST")?,
                ip_allow_list: get_env_list("SECURITY_IP_ALLOW_LIST")?,
                verify_code_ttl_secs: get_env_parsed(
                    "SECURITY_VERIFY_CODE_TTL_SECS",
                    Some("600"),
                    is_prod,
                )?,
            },
            allowed_origins: get_env_list("ALLOWED_ORIGINS")?,
            swagger_enabled: get_env_parsed("SWAGGER_ENABLED", Some("true"), is_prod)?,
        })
    }
}

/// Read an env var. In prod a missing value without a default is fatal; in
/// dev the default always applies.
fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => match default {
            Some(value) if !is_prod || !value.is_empty() => Ok(value.to_string()),
            _ => Err(AppError::ConfigError(anyhow::anyhow!(
                "required environment variable {} is not set",
                key
            ))),
        },
    }
}

fn get_env_parsed<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get_env(key, default, is_prod)?;
    raw.parse().map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("invalid value for {}: {}", key, e))
    })
}

fn get_env_list(key: &str) -> Result<Vec<String>, AppError> {
    Ok(env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_config_validation() {
        assert!(TokenConfig::default().validate().is_ok());
        let bad = TokenConfig {
            access_ttl_secs: 7200,
            refresh_ttl_secs: 3600,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_default_security_settings() {
        let s = SecuritySettings::default();
        assert_eq!(s.max_failed_retries, 5);
        assert!(s.ip_allow_list.is_empty());
    }
}
