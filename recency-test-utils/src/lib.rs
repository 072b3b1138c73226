//! Recency Test Utilities
//!
//! Shared test infrastructure for the recency workspace:
//! - Mock query executor, record fetcher and misbehaving cache backends
//! - Proptest generators for records, filters and mutation events
//! - Fixtures that wire a store, recorder and reconciler together
//! - Assertions for the reconciliation guarantees

pub use recency_core::{
    BackendError, EntityType, Filter, FilterExpr, FilterOperator, MutationEvent, Operation,
    OperationSet, Policy, PolicyOverride, Predicate, RecencyConfig, Record, RecordId,
};
pub use recency_storage::{
    BackendRegistry, CacheBackend, InMemoryBackend, MutationRecorder, QueryExecutor,
    RecencyStore, ReconciledIds, Reconciler, RecordDecision, RecordFetcher,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

// ============================================================================
// MOCK STORE
// ============================================================================

/// Error returned by the mock store when told to fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("mock store failure: {0}")]
pub struct MockStoreError(pub String);

/// One call received by [`MockQueryExecutor`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub entity_type: EntityType,
    pub filter: Filter,
    pub limit: usize,
}

/// Identifier-only store that answers from a fixed, ordered set of rows.
///
/// Rows with a record are filtered; rows without one always match, which
/// stands in for a store whose filtering the test does not care about.
#[derive(Debug, Default)]
pub struct MockQueryExecutor {
    rows: Vec<(RecordId, Option<Record>)>,
    requests: Mutex<Vec<QueryRequest>>,
    fail: AtomicBool,
    delay: Option<Duration>,
}

impl MockQueryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows returned regardless of the filter.
    pub fn with_ids<I>(ids: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<RecordId>,
    {
        Self {
            rows: ids.into_iter().map(|id| (id.into(), None)).collect(),
            ..Self::default()
        }
    }

    /// Rows that are matched against the query filter.
    pub fn with_rows(rows: Vec<(RecordId, Record)>) -> Self {
        Self {
            rows: rows
                .into_iter()
                .map(|(id, record)| (id, Some(record)))
                .collect(),
            ..Self::default()
        }
    }

    /// Sleep before answering (drive with paused tokio time).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<QueryRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Limits of every request received so far.
    pub fn requested_limits(&self) -> Vec<usize> {
        self.requests().into_iter().map(|r| r.limit).collect()
    }
}

#[async_trait]
impl QueryExecutor for MockQueryExecutor {
    type Error = MockStoreError;

    async fn execute(
        &self,
        entity_type: &EntityType,
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<RecordId>, MockStoreError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(QueryRequest {
                entity_type: entity_type.clone(),
                filter: filter.clone(),
                limit,
            });
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(MockStoreError("connection reset".to_string()));
        }

        Ok(self
            .rows
            .iter()
            .filter(|(_, record)| match record {
                Some(record) => filter.evaluate(record).unwrap_or(false),
                None => true,
            })
            .map(|(id, _)| id.clone())
            .take(limit)
            .collect())
    }
}

/// Record fetcher backed by a map; unknown ids are simply absent.
#[derive(Debug, Default)]
pub struct MockRecordFetcher {
    records: HashMap<RecordId, Record>,
    fail: AtomicBool,
}

impl MockRecordFetcher {
    pub fn new(records: impl IntoIterator<Item = (RecordId, Record)>) -> Self {
        Self {
            records: records.into_iter().collect(),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordFetcher for MockRecordFetcher {
    type Error = MockStoreError;

    async fn fetch_many(
        &self,
        _entity_type: &EntityType,
        ids: &[RecordId],
    ) -> Result<Vec<(RecordId, Record)>, MockStoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MockStoreError("fetch failed".to_string()));
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.records.get(id).map(|r| (id.clone(), r.clone())))
            .collect())
    }
}

// ============================================================================
// MISBEHAVING BACKENDS
// ============================================================================

/// Backend that rejects every call as unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableBackend;

#[async_trait]
impl CacheBackend for UnavailableBackend {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        Err(BackendError::unavailable("connection refused"))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), BackendError> {
        Err(BackendError::unavailable("connection refused"))
    }

    async fn list_keys(&self, _prefix: &str) -> Result<Vec<String>, BackendError> {
        Err(BackendError::unavailable("connection refused"))
    }
}

/// Backend that never answers within any sensible timeout.
#[derive(Debug, Clone, Copy)]
pub struct StalledBackend {
    pub stall: Duration,
}

impl Default for StalledBackend {
    fn default() -> Self {
        Self {
            stall: Duration::from_secs(3600),
        }
    }
}

#[async_trait]
impl CacheBackend for StalledBackend {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        tokio::time::sleep(self.stall).await;
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), BackendError> {
        tokio::time::sleep(self.stall).await;
        Ok(())
    }

    async fn list_keys(&self, _prefix: &str) -> Result<Vec<String>, BackendError> {
        tokio::time::sleep(self.stall).await;
        Ok(Vec::new())
    }
}

/// Install a test subscriber honouring `RECENCY_TEST_LOG` (once per process).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("RECENCY_TEST_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for recency types.

    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    /// Names drawn from a small pool so filters actually match.
    pub const NAMES: &[&str] = &["Ted", "Bob", "Alice", "Mallory"];

    /// Generate an integer or text identifier.
    pub fn arb_record_id() -> impl Strategy<Value = RecordId> {
        prop_oneof![
            (0i64..10_000).prop_map(RecordId::Int),
            "[a-z0-9]{1,8}".prop_map(RecordId::Text),
        ]
    }

    /// Generate an integer identifier from a small range (collisions likely).
    pub fn arb_small_id() -> impl Strategy<Value = RecordId> {
        (0i64..32).prop_map(RecordId::Int)
    }

    /// Generate an entity type name.
    pub fn arb_entity_type() -> impl Strategy<Value = EntityType> {
        "[a-z]{1,6}(:[a-z]{1,4})?".prop_map(EntityType::from)
    }

    /// Generate a mutation operation.
    pub fn arb_operation() -> impl Strategy<Value = Operation> {
        prop_oneof![
            Just(Operation::Created),
            Just(Operation::Modified),
            Just(Operation::Deleted),
        ]
    }

    /// Generate a person-like snapshot `{name, age, active}`.
    pub fn arb_record() -> impl Strategy<Value = Record> {
        (
            prop::sample::select(NAMES),
            0i64..100,
            any::<bool>(),
        )
            .prop_map(|(name, age, active)| {
                fixtures::snapshot(json!({"name": name, "age": age, "active": active}))
            })
    }

    /// Generate a filter over the fields of [`arb_record`].
    pub fn arb_filter() -> impl Strategy<Value = Filter> {
        prop_oneof![
            Just(Filter::All),
            prop::sample::select(NAMES).prop_map(|name| Filter::eq("name", json!(name))),
            (0i64..100).prop_map(|age| Filter::expr("age", FilterOperator::Gte, json!(age))),
            any::<bool>().prop_map(|active| Filter::eq("active", json!(active))),
        ]
    }

    /// Generate a mutation event for `entity_type`.
    pub fn arb_mutation_event(entity_type: EntityType) -> impl Strategy<Value = MutationEvent> {
        (arb_small_id(), arb_operation(), arb_record()).prop_map(
            move |(identifier, operation, record)| {
                let snapshot = (operation != Operation::Deleted).then_some(record);
                MutationEvent::new(entity_type.clone(), identifier, operation, snapshot)
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built configurations and wired-up engines.

    use super::*;

    /// Build a snapshot from a JSON object literal.
    ///
    /// Non-object values yield an empty snapshot.
    pub fn snapshot(value: serde_json::Value) -> Record {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Record::new(),
        }
    }

    /// Configuration that caches creations and modifications in `default`.
    pub fn caching_config() -> RecencyConfig {
        RecencyConfig::new().with_defaults(Policy {
            cache_on_creation: true,
            cache_on_modification: true,
            ..Policy::default()
        })
    }

    /// Configuration with both caching flags off; only deletions recorded.
    pub fn deletions_only_config() -> RecencyConfig {
        RecencyConfig::new()
    }

    /// A recorder and reconciler sharing one store.
    pub struct Engine<E: QueryExecutor = MockQueryExecutor> {
        pub store: Arc<RecencyStore>,
        pub recorder: MutationRecorder,
        pub reconciler: Reconciler<E>,
        pub executor: Arc<E>,
    }

    impl<E: QueryExecutor> Engine<E> {
        /// Record a batch of events, panicking on serialization failure.
        pub async fn apply(&self, events: impl IntoIterator<Item = MutationEvent>) {
            for event in events {
                if let Err(e) = self.recorder.on_mutation(event).await {
                    panic!("recording failed: {}", e);
                }
            }
        }
    }

    /// Registry with a fresh in-memory backend under each name.
    pub fn memory_registry(names: &[&str]) -> (BackendRegistry, Vec<Arc<InMemoryBackend>>) {
        let mut registry = BackendRegistry::new();
        let mut backends = Vec::with_capacity(names.len());
        for name in names {
            let backend = Arc::new(InMemoryBackend::new());
            registry.register(*name, backend.clone());
            backends.push(backend);
        }
        (registry, backends)
    }

    /// Wire an engine over an explicit registry.
    pub fn engine_with_registry<E: QueryExecutor>(
        config: RecencyConfig,
        registry: BackendRegistry,
        executor: E,
    ) -> Engine<E> {
        let store = Arc::new(RecencyStore::new(
            recency_core::ConfigResolver::new(config),
            registry,
        ));
        let executor = Arc::new(executor);
        Engine {
            recorder: MutationRecorder::new(store.clone()),
            reconciler: Reconciler::new(store.clone(), executor.clone()),
            store,
            executor,
        }
    }

    /// Wire an engine over a single in-memory `default` backend.
    pub fn engine<E: QueryExecutor>(config: RecencyConfig, executor: E) -> Engine<E> {
        let (registry, _) = memory_registry(&["default"]);
        engine_with_registry(config, registry, executor)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for reconciliation guarantees.

    use super::*;

    /// Assert that no reconciled identifier is in `deleted`.
    #[track_caller]
    pub fn assert_masks_deleted(ids: &ReconciledIds, deleted: &[RecordId]) {
        for id in deleted {
            assert!(
                !ids.contains(id),
                "Deleted identifier {} present in reconciled result",
                id
            );
        }
    }

    /// Assert that the result respects `limit`.
    #[track_caller]
    pub fn assert_within_limit(ids: &ReconciledIds, limit: usize) {
        assert!(
            ids.len() <= limit,
            "Reconciled {} identifiers with limit {}",
            ids.len(),
            limit
        );
    }

    /// Assert that an event was recorded into at least one backend.
    #[track_caller]
    pub fn assert_recorded(decision: &RecordDecision) {
        match decision {
            RecordDecision::Recorded(outcome) => assert!(
                outcome.is_stored(),
                "Event recorded into no backend: {:?}",
                outcome
            ),
            other => panic!("Expected Recorded, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
