//! Session store: persistence and query surface for tokens.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::dtos::token::{QueryTokenRequest, TokenSet};
use crate::models::{BlockReason, GrantType, Platform, Token, TokenStatus, UserType};
use crate::services::ServiceError;

/// Persistence contract for session records.
///
/// `save` is an upsert keyed by access token. `latest_for_user` returns the
/// newest session for a user on a platform regardless of its status, since
/// blocked records still carry the last active namespace.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, token: &Token) -> Result<(), ServiceError>;
    async fn get(&self, access_token: &str) -> Result<Option<Token>, ServiceError>;
    async fn delete(&self, access_token: &str) -> Result<(), ServiceError>;
    async fn latest_for_user(
        &self,
        user_id: &str,
        platform: Platform,
        exclude_access_token: &str,
    ) -> Result<Option<Token>, ServiceError>;
    /// Un-blocked web sessions for a user other than the given one.
    async fn active_web_tokens(
        &self,
        user_id: &str,
        exclude_access_token: &str,
    ) -> Result<Vec<Token>, ServiceError>;
    async fn query(&self, req: &QueryTokenRequest) -> Result<TokenSet, ServiceError>;
}

/// Flat row shape for the `tokens` table. Status is stored as three columns
/// so the record round-trips; the domain model folds them back into the
/// tagged `TokenStatus`.
#[derive(Debug, FromRow)]
struct TokenRow {
    access_token: String,
    refresh_token: String,
    user_id: String,
    username: String,
    domain: String,
    user_type: String,
    namespace: String,
    platform: String,
    grant_type: String,
    access_expired_at: i64,
    refresh_expired_at: i64,
    is_blocked: bool,
    block_reason: Option<String>,
    block_detail: Option<String>,
    created_at: i64,
    updated_at: i64,
    login_ip: String,
}

impl TryFrom<TokenRow> for Token {
    type Error = ServiceError;

    fn try_from(row: TokenRow) -> Result<Self, ServiceError> {
        let platform: Platform = row
            .platform
            .parse()
            .map_err(|e: String| ServiceError::Internal(anyhow::anyhow!(e)))?;
        let grant_type: GrantType = row
            .grant_type
            .parse()
            .map_err(|e: String| ServiceError::Internal(anyhow::anyhow!(e)))?;
        let user_type: UserType = row
            .user_type
            .parse()
            .map_err(|e: String| ServiceError::Internal(anyhow::anyhow!(e)))?;

        let status = if row.is_blocked {
            let reason: BlockReason = row
                .block_reason
                .as_deref()
                .unwrap_or("")
                .parse()
                .map_err(|e: String| ServiceError::Internal(anyhow::anyhow!(e)))?;
            TokenStatus::Blocked {
                reason,
                detail: row.block_detail.unwrap_or_default(),
            }
        } else {
            TokenStatus::Active
        };

        Ok(Token {
            access_token: row.access_token,
            refresh_token: row.refresh_token,
            user_id: row.user_id,
            username: row.username,
            domain: row.domain,
            user_type,
            namespace: row.namespace,
            available_namespaces: Vec::new(),
            platform,
            grant_type,
            access_expired_at: row.access_expired_at,
            refresh_expired_at: row.refresh_expired_at,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
            login_ip: row.login_ip,
        })
    }
}

fn status_columns(token: &Token) -> (bool, Option<&'static str>, Option<&str>) {
    match &token.status {
        TokenStatus::Active => (false, None, None),
        TokenStatus::Blocked { reason, detail } => {
            (true, Some(reason.as_str()), Some(detail.as_str()))
        }
    }
}

/// PostgreSQL-backed session store.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn save(&self, token: &Token) -> Result<(), ServiceError> {
        let (is_blocked, block_reason, block_detail) = status_columns(token);
        sqlx::query(
            r#"
            INSERT INTO tokens (
                access_token, refresh_token, user_id, username, domain, user_type,
                namespace, platform, grant_type, access_expired_at, refresh_expired_at,
                is_blocked, block_reason, block_detail, created_at, updated_at, login_ip
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (access_token) DO UPDATE SET
                namespace = EXCLUDED.namespace,
                access_expired_at = EXCLUDED.access_expired_at,
                refresh_expired_at = EXCLUDED.refresh_expired_at,
                is_blocked = EXCLUDED.is_blocked,
                block_reason = EXCLUDED.block_reason,
                block_detail = EXCLUDED.block_detail,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&token.access_token)
        .bind(&token.refresh_token)
        .bind(&token.user_id)
        .bind(&token.username)
        .bind(&token.domain)
        .bind(token.user_type.as_str())
        .bind(&token.namespace)
        .bind(token.platform.as_str())
        .bind(token.grant_type.as_str())
        .bind(token.access_expired_at)
        .bind(token.refresh_expired_at)
        .bind(is_blocked)
        .bind(block_reason)
        .bind(block_detail)
        .bind(token.created_at)
        .bind(token.updated_at)
        .bind(&token.login_ip)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, access_token: &str) -> Result<Option<Token>, ServiceError> {
        let row: Option<TokenRow> =
            sqlx::query_as("SELECT * FROM tokens WHERE access_token = $1")
                .bind(access_token)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Token::try_from).transpose()
    }

    async fn delete(&self, access_token: &str) -> Result<(), ServiceError> {
        sqlx::query("DELETE FROM tokens WHERE access_token = $1")
            .bind(access_token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn latest_for_user(
        &self,
        user_id: &str,
        platform: Platform,
        exclude_access_token: &str,
    ) -> Result<Option<Token>, ServiceError> {
        let row: Option<TokenRow> = sqlx::query_as(
            r#"
            SELECT * FROM tokens
            WHERE user_id = $1 AND platform = $2 AND access_token <> $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .bind(exclude_access_token)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Token::try_from).transpose()
    }

    async fn active_web_tokens(
        &self,
        user_id: &str,
        exclude_access_token: &str,
    ) -> Result<Vec<Token>, ServiceError> {
        let rows: Vec<TokenRow> = sqlx::query_as(
            r#"
            SELECT * FROM tokens
            WHERE user_id = $1 AND platform = 'web'
              AND is_blocked = FALSE AND access_token <> $2
            "#,
        )
        .bind(user_id)
        .bind(exclude_access_token)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Token::try_from).collect()
    }

    async fn query(&self, req: &QueryTokenRequest) -> Result<TokenSet, ServiceError> {
        let limit = req.limit() as i64;
        let offset = req.offset() as i64;
        let platform = req.platform.map(|p| p.as_str().to_string());

        let rows: Vec<TokenRow> = sqlx::query_as(
            r#"
            SELECT * FROM tokens
            WHERE ($1::text IS NULL OR user_id = $1)
              AND ($2::text IS NULL OR platform = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(&req.user_id)
        .bind(&platform)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM tokens
            WHERE ($1::text IS NULL OR user_id = $1)
              AND ($2::text IS NULL OR platform = $2)
            "#,
        )
        .bind(&req.user_id)
        .bind(&platform)
        .fetch_one(&self.pool)
        .await?;

        let items = rows
            .into_iter()
            .map(Token::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TokenSet { items, total })
    }
}

/// In-memory session store for tests. A monotonic sequence breaks ties when
/// two saves land in the same millisecond.
#[derive(Default)]
pub struct MemorySessionStore {
    tokens: Mutex<HashMap<String, (u64, Token)>>,
    seq: AtomicU64,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, token: &Token) -> Result<(), ServiceError> {
        let mut tokens = self.tokens.lock().unwrap();
        let seq = match tokens.get(&token.access_token) {
            Some((seq, _)) => *seq,
            None => self.seq.fetch_add(1, Ordering::SeqCst),
        };
        tokens.insert(token.access_token.clone(), (seq, token.clone()));
        Ok(())
    }

    async fn get(&self, access_token: &str) -> Result<Option<Token>, ServiceError> {
        Ok(self
            .tokens
            .lock()
            .unwrap()
            .get(access_token)
            .map(|(_, tk)| tk.clone()))
    }

    async fn delete(&self, access_token: &str) -> Result<(), ServiceError> {
        self.tokens.lock().unwrap().remove(access_token);
        Ok(())
    }

    async fn latest_for_user(
        &self,
        user_id: &str,
        platform: Platform,
        exclude_access_token: &str,
    ) -> Result<Option<Token>, ServiceError> {
        let tokens = self.tokens.lock().unwrap();
        Ok(tokens
            .values()
            .filter(|(_, tk)| {
                tk.user_id == user_id
                    && tk.platform == platform
                    && tk.access_token != exclude_access_token
            })
            .max_by_key(|(seq, _)| *seq)
            .map(|(_, tk)| tk.clone()))
    }

    async fn active_web_tokens(
        &self,
        user_id: &str,
        exclude_access_token: &str,
    ) -> Result<Vec<Token>, ServiceError> {
        let tokens = self.tokens.lock().unwrap();
        Ok(tokens
            .values()
            .filter(|(_, tk)| {
                tk.user_id == user_id
                    && tk.platform == Platform::Web
                    && !tk.is_blocked()
                    && tk.access_token != exclude_access_token
            })
            .map(|(_, tk)| tk.clone())
            .collect())
    }

    async fn query(&self, req: &QueryTokenRequest) -> Result<TokenSet, ServiceError> {
        let tokens = self.tokens.lock().unwrap();
        let mut matching: Vec<(u64, Token)> = tokens
            .values()
            .filter(|(_, tk)| {
                req.user_id.as_deref().map_or(true, |u| tk.user_id == u)
                    && req.platform.map_or(true, |p| tk.platform == p)
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.0.cmp(&a.0));

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(req.offset() as usize)
            .take(req.limit() as usize)
            .map(|(_, tk)| tk)
            .collect();
        Ok(TokenSet { items, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GrantType;

    fn token_for(user_id: &str, platform: Platform) -> Token {
        Token::new(
            user_id,
            "alice",
            "default",
            UserType::Sub,
            "ns-default",
            platform,
            GrantType::Password,
            3600,
            4 * 3600,
            "10.0.0.1",
        )
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemorySessionStore::new();
        let tk = token_for("u-1", Platform::Web);
        store.save(&tk).await.unwrap();

        let loaded = store.get(&tk.access_token).await.unwrap().unwrap();
        assert_eq!(loaded.refresh_token, tk.refresh_token);

        store.delete(&tk.access_token).await.unwrap();
        assert!(store.get(&tk.access_token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_for_user_excludes_current() {
        let store = MemorySessionStore::new();
        let first = token_for("u-1", Platform::Web);
        let second = token_for("u-1", Platform::Web);
        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();

        let latest = store
            .latest_for_user("u-1", Platform::Web, &second.access_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.access_token, first.access_token);
    }

    #[tokio::test]
    async fn test_active_web_tokens_skips_blocked_and_other_platforms() {
        let store = MemorySessionStore::new();
        let mut blocked = token_for("u-1", Platform::Web);
        blocked.block(BlockReason::OtherPlaceLoggedIn, "test");
        let api = token_for("u-1", Platform::Api);
        let live = token_for("u-1", Platform::Web);
        store.save(&blocked).await.unwrap();
        store.save(&api).await.unwrap();
        store.save(&live).await.unwrap();

        let active = store.active_web_tokens("u-1", "none").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].access_token, live.access_token);
    }

    #[tokio::test]
    async fn test_query_pages_newest_first() {
        let store = MemorySessionStore::new();
        for _ in 0..5 {
            store.save(&token_for("u-1", Platform::Web)).await.unwrap();
        }
        store.save(&token_for("u-2", Platform::Web)).await.unwrap();

        let req = QueryTokenRequest {
            user_id: Some("u-1".to_string()),
            platform: Some(Platform::Web),
            page_size: 2,
            page_number: 1,
        };
        let set = store.query(&req).await.unwrap();
        assert_eq!(set.total, 5);
        assert_eq!(set.items.len(), 2);
    }
}
