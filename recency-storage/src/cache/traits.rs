//! Cache backend trait and statistics.
//!
//! This module defines the minimal key/value contract the recency store
//! needs from a physical cache: point reads, TTL writes and prefix listing.

use std::time::Duration;

use async_trait::async_trait;
use recency_core::BackendError;

/// Cache backend trait for pluggable cache implementations.
///
/// This trait abstracts over different cache backends (in-memory, LMDB,
/// Redis, memcached behind a listing index). Implementations must be
/// thread-safe and support concurrent access; the engine never locks a
/// backend and never relies on multi-key atomicity.
///
/// # Failure
///
/// Every method may fail with [`BackendError::Unavailable`]. Callers treat
/// that as "this backend contributes nothing", never as a fatal error.
///
/// # Expiry
///
/// An entry written with a TTL must stop being returned by `get` and
/// `list_keys` once the TTL has elapsed. Backends may also drop entries
/// earlier (eviction, flush); callers tolerate that.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    /// Store a value that expires after `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), BackendError>;

    /// List live keys starting with `prefix`.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, BackendError>;

    /// Get backend statistics.
    async fn stats(&self) -> Result<BackendStats, BackendError> {
        Ok(BackendStats::default())
    }
}

/// Statistics about backend usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Number of reads that found a live value.
    pub hits: u64,
    /// Number of reads that found nothing (absent or expired).
    pub misses: u64,
    /// Number of writes.
    pub writes: u64,
    /// Number of entries currently stored, expired ones included until purged.
    pub entry_count: u64,
}

impl BackendStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_stats_hit_rate() {
        let stats = BackendStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = BackendStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }
}
