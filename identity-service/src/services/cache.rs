//! Security cache: failed-login counters and step-up verification codes.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};

use crate::services::ServiceError;

/// Short-lived security state shared across instances. Failure counters
/// back the max-failed-retry check; verification codes back step-up.
#[async_trait]
pub trait SecurityCache: Send + Sync {
    /// Record one failed login and return the count inside the window.
    async fn incr_login_failure(&self, username: &str, window_secs: i64)
        -> Result<u32, ServiceError>;
    async fn login_failures(&self, username: &str) -> Result<u32, ServiceError>;
    async fn reset_login_failures(&self, username: &str) -> Result<(), ServiceError>;

    async fn set_verify_code(
        &self,
        username: &str,
        code: &str,
        ttl_secs: i64,
    ) -> Result<(), ServiceError>;
    async fn get_verify_code(&self, username: &str) -> Result<Option<String>, ServiceError>;
    async fn clear_verify_code(&self, username: &str) -> Result<(), ServiceError>;

    async fn health_check(&self) -> Result<(), ServiceError>;
}

#[derive(Clone)]
pub struct RedisSecurityCache {
    manager: ConnectionManager,
}

impl RedisSecurityCache {
    pub async fn connect(url: &str) -> Result<Self, ServiceError> {
        tracing::info!(url = %url, "connecting to redis");
        let client = Client::open(url)?;

        // ConnectionManager reconnects on its own after drops.
        let manager = client.get_connection_manager().await?;
        tracing::info!("redis connected");

        Ok(Self { manager })
    }

    fn failure_key(username: &str) -> String {
        format!("login_failures:{}", username)
    }

    fn code_key(username: &str) -> String {
        format!("verify_code:{}", username)
    }
}

#[async_trait]
impl SecurityCache for RedisSecurityCache {
    async fn incr_login_failure(
        &self,
        username: &str,
        window_secs: i64,
    ) -> Result<u32, ServiceError> {
        let mut conn = self.manager.clone();
        let key = Self::failure_key(username);

        let count: u32 = redis::cmd("INCR").arg(&key).query_async(&mut conn).await?;
        // The window restarts on every failure; a patient attacker still
        // hits the threshold before the key can lapse.
        redis::cmd("EXPIRE")
            .arg(&key)
            .arg(window_secs)
            .query_async::<_, ()>(&mut conn)
            .await?;

        Ok(count)
    }

    async fn login_failures(&self, username: &str) -> Result<u32, ServiceError> {
        let mut conn = self.manager.clone();
        let count: Option<u32> = redis::cmd("GET")
            .arg(Self::failure_key(username))
            .query_async(&mut conn)
            .await?;
        Ok(count.unwrap_or(0))
    }

    async fn reset_login_failures(&self, username: &str) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(Self::failure_key(username))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_verify_code(
        &self,
        username: &str,
        code: &str,
        ttl_secs: i64,
    ) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(Self::code_key(username))
            .arg(code)
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_verify_code(&self, username: &str) -> Result<Option<String>, ServiceError> {
        let mut conn = self.manager.clone();
        let code: Option<String> = redis::cmd("GET")
            .arg(Self::code_key(username))
            .query_async(&mut conn)
            .await?;
        Ok(code)
    }

    async fn clear_verify_code(&self, username: &str) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(Self::code_key(username))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

/// In-memory stand-in for tests. Ignores TTLs; tests control time by
/// clearing state explicitly.
#[derive(Default)]
pub struct MemorySecurityCache {
    failures: std::sync::Mutex<std::collections::HashMap<String, u32>>,
    codes: std::sync::Mutex<std::collections::HashMap<String, String>>,
}

impl MemorySecurityCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecurityCache for MemorySecurityCache {
    async fn incr_login_failure(
        &self,
        username: &str,
        _window_secs: i64,
    ) -> Result<u32, ServiceError> {
        let mut failures = self.failures.lock().unwrap();
        let count = failures.entry(username.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn login_failures(&self, username: &str) -> Result<u32, ServiceError> {
        Ok(*self.failures.lock().unwrap().get(username).unwrap_or(&0))
    }

    async fn reset_login_failures(&self, username: &str) -> Result<(), ServiceError> {
        self.failures.lock().unwrap().remove(username);
        Ok(())
    }

    async fn set_verify_code(
        &self,
        username: &str,
        code: &str,
        _ttl_secs: i64,
    ) -> Result<(), ServiceError> {
        self.codes
            .lock()
            .unwrap()
            .insert(username.to_string(), code.to_string());
        Ok(())
    }

    async fn get_verify_code(&self, username: &str) -> Result<Option<String>, ServiceError> {
        Ok(self.codes.lock().unwrap().get(username).cloned())
    }

    async fn clear_verify_code(&self, username: &str) -> Result<(), ServiceError> {
        self.codes.lock().unwrap().remove(username);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}
