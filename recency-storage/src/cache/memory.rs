//! In-process cache backend with lazy TTL expiry.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use recency_core::BackendError;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::traits::{BackendStats, CacheBackend};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-memory backend, the equivalent of a per-process local-memory cache.
///
/// Expired entries are hidden on read and dropped on the next write or
/// [`InMemoryBackend::purge_expired`]. Expiry follows the tokio clock, so
/// tests can drive it with `tokio::time::pause`/`advance`.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    stats: RwLock<BackendStats>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry, as a process-wide cache flush would.
    pub async fn flush(&self) -> u64 {
        let mut entries = self.entries.write().await;
        let dropped = entries.len() as u64;
        entries.clear();
        self.stats.write().await.entry_count = 0;
        dropped
    }

    /// Remove entries whose TTL has elapsed.
    pub async fn purge_expired(&self) -> u64 {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        let purged = (before - entries.len()) as u64;
        self.stats.write().await.entry_count = entries.len() as u64;
        purged
    }

    /// Number of stored entries, expired ones included until purged.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let now = Instant::now();
        let value = self
            .entries
            .read()
            .await
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone());

        let mut stats = self.stats.write().await;
        if value.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), BackendError> {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).unwrap_or_else(far_future);
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.is_live(now));
        entries.insert(key.to_string(), MemoryEntry { value, expires_at });

        let mut stats = self.stats.write().await;
        stats.writes += 1;
        stats.entry_count = entries.len() as u64;
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn stats(&self) -> Result<BackendStats, BackendError> {
        Ok(self.stats.read().await.clone())
    }
}

fn far_future() -> Instant {
    // ~30 years; Instant has no MAX constant
    Instant::now() + Duration::from_secs(60 * 60 * 24 * 365 * 30)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let backend = InMemoryBackend::new();
        backend
            .set("k", b"v".to_vec(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(backend.get("missing").await.unwrap(), None);

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let backend = InMemoryBackend::new();
        backend
            .set("recency:1:a:i:1", b"1".to_vec(), Duration::from_secs(5))
            .await
            .unwrap();
        backend
            .set("recency:1:a:i:2", b"2".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(backend.get("recency:1:a:i:1").await.unwrap(), None);
        assert_eq!(
            backend.list_keys("recency:1:a:").await.unwrap(),
            vec!["recency:1:a:i:2".to_string()]
        );
        assert_eq!(backend.purge_expired().await, 1);
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn test_list_keys_filters_prefix() {
        let backend = InMemoryBackend::new();
        let ttl = Duration::from_secs(10);
        backend.set("recency:1:a:i:1", vec![], ttl).await.unwrap();
        backend.set("recency:1:b:i:1", vec![], ttl).await.unwrap();

        let keys = backend.list_keys("recency:1:a:").await.unwrap();
        assert_eq!(keys, vec!["recency:1:a:i:1".to_string()]);
    }

    #[tokio::test]
    async fn test_flush_drops_everything() {
        let backend = InMemoryBackend::new();
        backend
            .set("k", vec![1], Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(backend.flush().await, 1);
        assert!(backend.is_empty().await);
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value_and_ttl() {
        let backend = InMemoryBackend::new();
        backend
            .set("k", vec![1], Duration::from_secs(10))
            .await
            .unwrap();
        backend
            .set("k", vec![2], Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(vec![2]));
        assert_eq!(backend.len().await, 1);
    }
}
