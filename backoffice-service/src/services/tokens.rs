//! Acceptance token store backed by Redis.
//!
//! A priced quote gets an opaque token that gates the public acceptance page.
//! Tokens live in two keyspaces: `accept_token:{token}` maps a token to its
//! quote id and `quote_token:{quote_id}` tracks the current token for a
//! quote. Re-sending a quote issues a fresh token and drops the old one, so
//! only the link in the latest email works.

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use service_core::error::AppError;
use tracing::{info, instrument};

const TOKEN_LENGTH: usize = 48;

fn reverse_key(token: &str) -> String {
    format!("accept_token:{}", token)
}

fn forward_key(quote_id: i64) -> String {
    format!("quote_token:{}", quote_id)
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Token store operations used by the acceptance flow.
#[async_trait]
pub trait AcceptanceTokens: Send + Sync {
    /// Issue a fresh token for a quote, replacing any existing one.
    async fn issue(&self, quote_id: i64, ttl_seconds: u64) -> Result<String, AppError>;

    /// Resolve a token to its quote id without consuming it.
    async fn resolve(&self, token: &str) -> Result<Option<i64>, AppError>;

    /// Remove a token pair after a successful acceptance.
    async fn consume(&self, token: &str, quote_id: i64) -> Result<(), AppError>;
}

/// Redis-backed token store.
#[derive(Clone)]
pub struct RedisTokenStore {
    manager: ConnectionManager,
}

impl RedisTokenStore {
    #[instrument(skip(redis_url))]
    pub async fn new(redis_url: &str) -> Result<Self, AppError> {
        info!("Connecting to Redis");
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        info!("Redis connection established");
        Ok(Self { manager })
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl AcceptanceTokens for RedisTokenStore {
    #[instrument(skip(self), fields(quote_id = %quote_id))]
    async fn issue(&self, quote_id: i64, ttl_seconds: u64) -> Result<String, AppError> {
        let mut conn = self.manager.clone();

        // Invalidate the previous token before writing the new pair.
        let old_token: Option<String> = conn.get(forward_key(quote_id)).await?;
        if let Some(old) = old_token {
            let _: () = conn.del(reverse_key(&old)).await?;
        }

        let token = generate_token();
        let _: () = conn
            .set_ex(reverse_key(&token), quote_id, ttl_seconds)
            .await?;
        let _: () = conn
            .set_ex(forward_key(quote_id), &token, ttl_seconds)
            .await?;

        info!(quote_id = %quote_id, "Acceptance token issued");

        Ok(token)
    }

    #[instrument(skip(self, token))]
    async fn resolve(&self, token: &str) -> Result<Option<i64>, AppError> {
        let mut conn = self.manager.clone();
        let quote_id: Option<i64> = conn.get(reverse_key(token)).await?;
        Ok(quote_id)
    }

    #[instrument(skip(self, token), fields(quote_id = %quote_id))]
    async fn consume(&self, token: &str, quote_id: i64) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(reverse_key(token)).await?;
        let _: () = conn.del(forward_key(quote_id)).await?;
        info!(quote_id = %quote_id, "Acceptance token consumed");
        Ok(())
    }
}

/// In-memory token store for tests.
pub struct MockTokenStore {
    tokens: std::sync::Mutex<std::collections::HashMap<String, i64>>,
    by_quote: std::sync::Mutex<std::collections::HashMap<i64, String>>,
}

impl MockTokenStore {
    pub fn new() -> Self {
        Self {
            tokens: std::sync::Mutex::new(std::collections::HashMap::new()),
            by_quote: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for MockTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AcceptanceTokens for MockTokenStore {
    async fn issue(&self, quote_id: i64, _ttl_seconds: u64) -> Result<String, AppError> {
        let token = generate_token();
        let mut by_quote = self.by_quote.lock().unwrap();
        let mut tokens = self.tokens.lock().unwrap();
        if let Some(old) = by_quote.insert(quote_id, token.clone()) {
            tokens.remove(&old);
        }
        tokens.insert(token.clone(), quote_id);
        Ok(token)
    }

    async fn resolve(&self, token: &str) -> Result<Option<i64>, AppError> {
        Ok(self.tokens.lock().unwrap().get(token).copied())
    }

    async fn consume(&self, token: &str, quote_id: i64) -> Result<(), AppError> {
        self.tokens.lock().unwrap().remove(token);
        self.by_quote.lock().unwrap().remove(&quote_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_long_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_LENGTH);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn reissue_invalidates_previous_token() {
        let store = MockTokenStore::new();
        let first = store.issue(42, 60).await.unwrap();
        let second = store.issue(42, 60).await.unwrap();

        assert_eq!(store.resolve(&first).await.unwrap(), None);
        assert_eq!(store.resolve(&second).await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn consume_removes_both_directions() {
        let store = MockTokenStore::new();
        let token = store.issue(7, 60).await.unwrap();
        store.consume(&token, 7).await.unwrap();

        assert_eq!(store.resolve(&token).await.unwrap(), None);
        // A fresh issue works after consumption.
        let again = store.issue(7, 60).await.unwrap();
        assert_eq!(store.resolve(&again).await.unwrap(), Some(7));
    }
}
