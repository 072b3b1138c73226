//! Recency store: short-lived entries for recently mutated records.
//!
//! Entries are written to every backend the resolved policy selects and read
//! back from every backend that may hold entries for the type. A backend
//! whose listing fails or times out contributes nothing; one that fails
//! part way through contributes what it returned. Neither reads nor writes
//! ever fail the caller because of a backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use recency_core::{
    BackendError, ConfigResolver, EffectivePolicy, EntityType, Operation, OperationSet, Record,
    RecencyResult, RecordId, Timestamp,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::cache::{BackendRegistry, CacheBackend, RecencyKey};

/// One recorded mutation, as stored in a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecencyEntry {
    pub entity_type: EntityType,
    pub identifier: RecordId,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Record>,
    pub recorded_at: Timestamp,
    pub expires_at: Timestamp,
}

impl RecencyEntry {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }

    /// Last-write-wins ordering: later `recorded_at` wins, and a deletion
    /// wins a tie.
    fn supersedes(&self, other: &RecencyEntry) -> bool {
        match self.recorded_at.cmp(&other.recorded_at) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => {
                self.operation == Operation::Deleted && other.operation != Operation::Deleted
            }
        }
    }
}

/// Result of writing one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordOutcome {
    /// Backends that accepted the write.
    pub written: Vec<String>,
    /// Backends that failed, timed out or are not registered.
    pub failed: Vec<String>,
}

impl RecordOutcome {
    /// True if at least one backend holds the entry.
    pub fn is_stored(&self) -> bool {
        !self.written.is_empty()
    }
}

/// Deduplicated view of every live entry for one entity type.
#[derive(Debug, Clone, Default)]
pub struct RecencySweep {
    /// One entry per identifier, newest first.
    pub entries: Vec<RecencyEntry>,
    /// Backends that answered.
    pub reachable: usize,
    /// Backends that failed, timed out or are not registered.
    pub failed: usize,
}

impl RecencySweep {
    /// True when no backend answered at all.
    pub fn is_unavailable(&self) -> bool {
        self.reachable == 0 && self.failed > 0
    }

    /// Entries whose operation is in `operations`.
    pub fn filter(&self, operations: OperationSet) -> impl Iterator<Item = &RecencyEntry> {
        self.entries
            .iter()
            .filter(move |entry| operations.includes(entry.operation))
    }
}

/// Multi-backend recency store.
#[derive(Debug, Clone)]
pub struct RecencyStore {
    resolver: ConfigResolver,
    registry: Arc<BackendRegistry>,
    backend_timeout: Duration,
}

impl RecencyStore {
    /// Create a store; the backend timeout comes from the configuration.
    pub fn new(resolver: ConfigResolver, registry: BackendRegistry) -> Self {
        let backend_timeout = resolver.config().backend_timeout;
        Self {
            resolver,
            registry: Arc::new(registry),
            backend_timeout,
        }
    }

    /// Override the backend timeout.
    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn backend_timeout(&self) -> Duration {
        self.backend_timeout
    }

    /// Resolve the policy for an entity type.
    pub fn policy(&self, entity_type: &EntityType) -> EffectivePolicy {
        self.resolver.resolve(entity_type)
    }

    /// Write an entry into every backend the policy selects for `operation`.
    ///
    /// Backend failures are logged and reported in the outcome. The only
    /// error returned is a serialization failure of the entry itself.
    pub async fn record(
        &self,
        entity_type: &EntityType,
        identifier: RecordId,
        operation: Operation,
        snapshot: Option<Record>,
        ttl: Duration,
    ) -> RecencyResult<RecordOutcome> {
        let policy = self.policy(entity_type);
        let recorded_at = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| recorded_at.checked_add_signed(ttl))
            .unwrap_or(Timestamp::MAX_UTC);

        let key = RecencyKey::new(entity_type.clone(), identifier.clone()).encode();
        let entry = RecencyEntry {
            entity_type: entity_type.clone(),
            identifier,
            operation,
            snapshot,
            recorded_at,
            expires_at,
        };
        let value = serde_json::to_vec(&entry)?;

        let mut outcome = RecordOutcome::default();
        for name in policy.write_backends(operation) {
            let Some(backend) = self.registry.get(name) else {
                tracing::warn!(
                    backend = %name,
                    entity_type = %entity_type,
                    "Recency backend not registered, skipping write"
                );
                outcome.failed.push(name.to_string());
                continue;
            };

            let write = backend.set(&key, value.clone(), ttl);
            match with_timeout(self.backend_timeout, write).await {
                Ok(()) => outcome.written.push(name.to_string()),
                Err(e) => {
                    tracing::warn!(
                        backend = %name,
                        entity_type = %entity_type,
                        operation = %operation,
                        error = %e,
                        "Recency backend write failed"
                    );
                    outcome.failed.push(name.to_string());
                }
            }
        }

        tracing::trace!(
            entity_type = %entity_type,
            key = %key,
            written = outcome.written.len(),
            failed = outcome.failed.len(),
            "Recorded recency entry"
        );
        Ok(outcome)
    }

    /// Read every live entry for a type, deduplicated by identifier.
    pub async fn sweep(&self, entity_type: &EntityType) -> RecencySweep {
        self.sweep_with_timeout(entity_type, self.backend_timeout).await
    }

    /// [`RecencyStore::sweep`] with an explicit timeout for each backend's read.
    pub async fn sweep_with_timeout(
        &self,
        entity_type: &EntityType,
        timeout: Duration,
    ) -> RecencySweep {
        let policy = self.policy(entity_type);
        let prefix = RecencyKey::type_prefix(entity_type);
        let now = Utc::now();

        let mut latest: HashMap<RecordId, RecencyEntry> = HashMap::new();
        let mut sweep = RecencySweep::default();

        for name in policy.read_backends() {
            let Some(backend) = self.registry.get(name) else {
                tracing::warn!(
                    backend = %name,
                    entity_type = %entity_type,
                    "Recency backend not registered, skipping read"
                );
                sweep.failed += 1;
                continue;
            };

            let entries = match self.read_backend(backend.as_ref(), &prefix, timeout).await {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(
                        backend = %name,
                        entity_type = %entity_type,
                        error = %e,
                        "Recency backend read failed, ignoring its entries"
                    );
                    sweep.failed += 1;
                    continue;
                }
            };
            sweep.reachable += 1;

            for entry in entries {
                if entry.is_expired(now) || &entry.entity_type != entity_type {
                    continue;
                }
                match latest.get(&entry.identifier) {
                    Some(current) if !entry.supersedes(current) => {}
                    _ => {
                        latest.insert(entry.identifier.clone(), entry);
                    }
                }
            }
        }

        let mut entries: Vec<RecencyEntry> = latest.into_values().collect();
        entries.sort_by(|a, b| {
            b.recorded_at
                .cmp(&a.recorded_at)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        sweep.entries = entries;
        sweep
    }

    /// Entries whose latest operation is in `operations`, newest first.
    pub async fn recent(
        &self,
        entity_type: &EntityType,
        operations: OperationSet,
    ) -> Vec<RecencyEntry> {
        self.sweep(entity_type)
            .await
            .filter(operations)
            .cloned()
            .collect()
    }

    /// Read one backend's entries. `timeout` bounds the whole read, not
    /// each call. A failed listing fails the backend. A failed `get` skips its
    /// key, and hitting the deadline keeps the entries read so far.
    async fn read_backend(
        &self,
        backend: &dyn CacheBackend,
        prefix: &str,
        timeout: Duration,
    ) -> Result<Vec<RecencyEntry>, BackendError> {
        let deadline = Instant::now() + timeout;
        let keys = before_deadline(deadline, timeout, backend.list_keys(prefix)).await?;
        let mut entries = Vec::with_capacity(keys.len());
        for (read, key) in keys.iter().enumerate() {
            let bytes = match before_deadline(deadline, timeout, backend.get(key)).await {
                Ok(Some(bytes)) => bytes,
                // Listed keys may expire or be evicted before the read.
                Ok(None) => continue,
                Err(e) if Instant::now() >= deadline => {
                    tracing::warn!(
                        prefix = %prefix,
                        kept = entries.len(),
                        unread = keys.len() - read,
                        error = %e,
                        "Recency backend read ran out of time, keeping entries read so far"
                    );
                    break;
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Recency entry read failed, skipping it");
                    continue;
                }
            };
            match serde_json::from_slice::<RecencyEntry>(&bytes) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "Skipping undecodable recency entry");
                }
            }
        }
        Ok(entries)
    }
}

async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, BackendError>
where
    F: std::future::Future<Output = Result<T, BackendError>>,
{
    before_deadline(Instant::now() + timeout, timeout, fut).await
}

async fn before_deadline<T, F>(
    deadline: Instant,
    timeout: Duration,
    fut: F,
) -> Result<T, BackendError>
where
    F: std::future::Future<Output = Result<T, BackendError>>,
{
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::TimedOut { timeout }),
    }
}
