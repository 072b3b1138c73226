//! LMDB-backed cache backend.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key-value store that survives process restarts, so recency entries are
//! shared by every worker process on a host.
//!
//! # Value Layout
//!
//! `[expires_at: 8 bytes, i64 LE unix millis][payload]`. Expired entries are
//! hidden from `get` and `list_keys` and removed by
//! [`LmdbBackend::purge_expired`].

use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use recency_core::BackendError;

use super::traits::{BackendStats, CacheBackend};

const EXPIRY_PREFIX_LEN: usize = 8;

/// Error type for LMDB backend operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbBackendError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored value is too short to carry an expiry prefix.
    #[error("Corrupt value at {key}")]
    Corrupt { key: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbBackendError> for BackendError {
    fn from(e: LmdbBackendError) -> Self {
        match e {
            LmdbBackendError::Corrupt { key } => BackendError::Corrupt {
                key,
                reason: "value shorter than expiry prefix".to_string(),
            },
            other => BackendError::unavailable(other.to_string()),
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbBackendError {
    LmdbBackendError::Transaction(e.to_string())
}

/// LMDB-backed recency cache.
///
/// # Example
///
/// ```ignore
/// use recency_storage::cache::LmdbBackend;
///
/// let backend = LmdbBackend::new("/var/cache/recency", 64)?;
/// registry.register("shared", Arc::new(backend));
/// ```
pub struct LmdbBackend {
    env: Env,
    db: Database<Bytes, Bytes>,
    stats: RwLock<BackendStats>,
}

impl std::fmt::Debug for LmdbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbBackend")
            .field("path", &self.env.path())
            .finish_non_exhaustive()
    }
}

impl LmdbBackend {
    /// Open (or create) an LMDB backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbBackendError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process and
        // the memory map is only accessed through heed transactions.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbBackendError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbBackendError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        let backend = Self {
            env,
            db,
            stats: RwLock::new(BackendStats::default()),
        };
        let existing = backend.count_entries()?;
        backend.with_stats(|stats| stats.entry_count = existing);
        Ok(backend)
    }

    /// Delete every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> Result<u64, LmdbBackendError> {
        let now = now_millis();
        let expired: Vec<Vec<u8>> = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            let mut expired = Vec::new();
            for item in self.db.iter(&rtxn).map_err(txn_err)? {
                let (key, value) = item.map_err(txn_err)?;
                if expires_at(value).map_or(true, |at| at <= now) {
                    expired.push(key.to_vec());
                }
            }
            expired
        };

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut purged = 0u64;
        for key in &expired {
            if self.db.delete(&mut wtxn, key).map_err(txn_err)? {
                purged += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;

        let remaining = self.count_entries()?;
        self.with_stats(|stats| stats.entry_count = remaining);
        if purged > 0 {
            tracing::debug!(purged, remaining, "Purged expired LMDB recency entries");
        }
        Ok(purged)
    }

    fn count_entries(&self) -> Result<u64, LmdbBackendError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        self.db.len(&rtxn).map_err(txn_err)
    }

    fn with_stats(&self, update: impl FnOnce(&mut BackendStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn expires_at(value: &[u8]) -> Option<i64> {
    let prefix: [u8; EXPIRY_PREFIX_LEN] = value.get(..EXPIRY_PREFIX_LEN)?.try_into().ok()?;
    Some(i64::from_le_bytes(prefix))
}

fn encode_value(payload: &[u8], ttl: Duration) -> Vec<u8> {
    let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    let expires_at = now_millis().saturating_add(ttl_millis);
    let mut bytes = Vec::with_capacity(EXPIRY_PREFIX_LEN + payload.len());
    bytes.extend_from_slice(&expires_at.to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

#[async_trait]
impl CacheBackend for LmdbBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let stored = self.db.get(&rtxn, key.as_bytes()).map_err(txn_err)?;

        let value = match stored {
            Some(bytes) => {
                let expiry = expires_at(bytes).ok_or_else(|| LmdbBackendError::Corrupt {
                    key: key.to_string(),
                })?;
                (expiry > now_millis()).then(|| bytes[EXPIRY_PREFIX_LEN..].to_vec())
            }
            None => None,
        };

        self.with_stats(|stats| {
            if value.is_some() {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        });
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), BackendError> {
        let bytes = encode_value(&value, ttl);

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let is_new = self.db.get(&wtxn, key.as_bytes()).map_err(txn_err)?.is_none();
        self.db
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        self.with_stats(|stats| {
            stats.writes += 1;
            if is_new {
                stats.entry_count += 1;
            }
        });
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        let now = now_millis();
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut keys = Vec::new();
        for item in self
            .db
            .prefix_iter(&rtxn, prefix.as_bytes())
            .map_err(txn_err)?
        {
            let (key, value) = item.map_err(txn_err)?;
            if !expires_at(value).is_some_and(|at| at > now) {
                continue;
            }
            match std::str::from_utf8(key) {
                Ok(key) => keys.push(key.to_string()),
                Err(_) => tracing::debug!("Skipping non-UTF-8 key in LMDB backend"),
            }
        }
        Ok(keys)
    }

    async fn stats(&self) -> Result<BackendStats, BackendError> {
        self.stats
            .read()
            .map(|stats| stats.clone())
            .map_err(|_| BackendError::unavailable("stats lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_backend() -> (LmdbBackend, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let backend = LmdbBackend::new(temp_dir.path(), 10).expect("Failed to create backend");
        (backend, temp_dir)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (backend, _temp) = create_test_backend();
        backend
            .set("recency:1:a:i:1", b"payload".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        let value = backend.get("recency:1:a:i:1").await.unwrap();
        assert_eq!(value, Some(b"payload".to_vec()));
        assert_eq!(backend.get("recency:1:a:i:2").await.unwrap(), None);

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_never_visible() {
        let (backend, _temp) = create_test_backend();
        backend
            .set("recency:1:a:i:1", b"gone".to_vec(), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(backend.get("recency:1:a:i:1").await.unwrap(), None);
        assert!(backend.list_keys("recency:").await.unwrap().is_empty());
        assert_eq!(backend.purge_expired().unwrap(), 1);
        assert_eq!(backend.stats().await.unwrap().entry_count, 0);
    }

    #[tokio::test]
    async fn test_list_keys_uses_prefix() {
        let (backend, _temp) = create_test_backend();
        let ttl = Duration::from_secs(60);
        backend.set("recency:1:a:i:1", vec![], ttl).await.unwrap();
        backend.set("recency:1:a:i:2", vec![], ttl).await.unwrap();
        backend.set("recency:1:b:i:1", vec![], ttl).await.unwrap();

        let mut keys = backend.list_keys("recency:1:a:").await.unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec!["recency:1:a:i:1".to_string(), "recency:1:a:i:2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let backend = LmdbBackend::new(temp_dir.path(), 10).unwrap();
            backend
                .set("k", b"kept".to_vec(), Duration::from_secs(60))
                .await
                .unwrap();
        }
        let reopened = LmdbBackend::new(temp_dir.path(), 10).unwrap();
        assert_eq!(reopened.get("k").await.unwrap(), Some(b"kept".to_vec()));
        assert_eq!(reopened.stats().await.unwrap().entry_count, 1);
    }

    #[test]
    fn test_expiry_prefix_roundtrip() {
        let before = now_millis();
        let bytes = encode_value(b"x", Duration::from_secs(1));
        let at = expires_at(&bytes).unwrap();
        assert!(at >= before + 1000);
        assert_eq!(&bytes[EXPIRY_PREFIX_LEN..], b"x");
        assert_eq!(expires_at(&[1, 2, 3]), None);
    }

    #[test]
    fn test_error_conversion() {
        let corrupt: BackendError = LmdbBackendError::Corrupt {
            key: "k".to_string(),
        }
        .into();
        assert!(matches!(corrupt, BackendError::Corrupt { .. }));

        let txn: BackendError = LmdbBackendError::Transaction("boom".to_string()).into();
        assert!(matches!(txn, BackendError::Unavailable { .. }));
    }
}
