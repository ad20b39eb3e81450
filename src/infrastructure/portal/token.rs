//! Access-token cache for the Portal Client (§4.3.1): fetched lazily,
//! reused until expiry, refreshed once on a `401`.

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct TokenCache {
    inner: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self { inner: RwLock::new(None) }
    }

    /// A still-valid cached token, if one exists, with a small safety
    /// margin before expiry so a request never races a near-expiry token.
    pub async fn get(&self) -> Option<String> {
        let guard = self.inner.read().await;
        guard.as_ref().filter(|token| token.expires_at > Utc::now() + chrono::Duration::seconds(5)).map(|token| token.value.clone())
    }

    pub async fn set(&self, value: String, expires_at: DateTime<Utc>) {
        *self.inner.write().await = Some(CachedToken { value, expires_at });
    }

    pub async fn invalidate(&self) {
        *self.inner.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_none_before_first_set() {
        let cache = TokenCache::new();
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn returns_cached_value_before_expiry() {
        let cache = TokenCache::new();
        cache.set("abc".to_string(), Utc::now() + chrono::Duration::minutes(5)).await;
        assert_eq!(cache.get().await, Some("abc".to_string()));
    }

    #[tokio::test]
    async fn treats_near_expiry_token_as_absent() {
        let cache = TokenCache::new();
        cache.set("abc".to_string(), Utc::now() + chrono::Duration::seconds(1)).await;
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn invalidate_clears_the_cache() {
        let cache = TokenCache::new();
        cache.set("abc".to_string(), Utc::now() + chrono::Duration::minutes(5)).await;
        cache.invalidate().await;
        assert!(cache.get().await.is_none());
    }
}
