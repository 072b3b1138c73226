//! Reconciliation engine.
//!
//! Combines the identifiers an eventually-consistent store returns for a
//! query with the recency cache: recently created or modified objects that
//! match the filter are added, recently deleted ones are masked out.
//!
//! # Ordering
//!
//! Store results come first in store order, followed by recent matches,
//! newest first. The result never exceeds the requested limit.
//!
//! # Failure
//!
//! Executor failures are returned unchanged. A recency store with no
//! reachable backend degrades to a passthrough of the store query.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexSet;
use recency_core::{
    EntityType, Filter, Operation, OperationSet, PredicateError, Record, RecordId, Timestamp,
    DEFAULT_RESULT_LIMIT,
};

use crate::store::{RecencyEntry, RecencyStore, RecencySweep};

/// Identifier-only query against the external store.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Return at most `limit` identifiers matching `filter`, in store order.
    async fn execute(
        &self,
        entity_type: &EntityType,
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<RecordId>, Self::Error>;
}

/// Loads full records for reconciled identifiers.
#[async_trait]
pub trait RecordFetcher: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch the records that exist for `ids`, in any order.
    async fn fetch_many(
        &self,
        entity_type: &EntityType,
        ids: &[RecordId],
    ) -> Result<Vec<(RecordId, Record)>, Self::Error>;
}

/// Errors surfaced by [`Reconciler`].
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The external store (or fetcher) failed; carries its own error.
    #[error(transparent)]
    StoreQueryFailed(E),

    #[error("Store query timed out after {timeout:?}")]
    StoreQueryTimedOut { timeout: Duration },
}

impl<E> ReconcileError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Recover the executor's error, if that is what failed.
    pub fn into_store_error(self) -> Option<E> {
        match self {
            ReconcileError::StoreQueryFailed(e) => Some(e),
            ReconcileError::StoreQueryTimedOut { .. } => None,
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Maximum number of identifiers returned.
    pub limit: usize,
    /// Overrides the store's per-backend timeout.
    pub backend_timeout: Option<Duration>,
    /// Overrides the configured store query timeout.
    pub query_timeout: Option<Duration>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_RESULT_LIMIT,
            backend_timeout: None,
            query_timeout: None,
        }
    }
}

impl ReconcileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = Some(timeout);
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }
}

/// A recently created or modified object that matches a filter.
#[derive(Debug, Clone, PartialEq)]
pub struct RecentObject {
    pub identifier: RecordId,
    pub snapshot: Record,
    pub operation: Operation,
    pub recorded_at: Timestamp,
}

/// Figures from one reconciliation, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Identifiers returned by the executor.
    pub store_ids: usize,
    /// Recent objects matching the filter.
    pub recent_matches: usize,
    /// Identifiers dropped because they were recently deleted.
    pub deleted_masked: usize,
    /// Limit passed to the executor.
    pub external_limit: usize,
    /// True when no recency backend could be read.
    pub degraded: bool,
}

/// Ordered, duplicate-free result of [`Reconciler::reconcile`].
#[derive(Debug, Clone, Default)]
pub struct ReconciledIds {
    ids: IndexSet<RecordId>,
    stats: ReconcileStats,
}

impl ReconciledIds {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.ids.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecordId> {
        self.ids.iter()
    }

    pub fn as_set(&self) -> &IndexSet<RecordId> {
        &self.ids
    }

    pub fn stats(&self) -> &ReconcileStats {
        &self.stats
    }

    pub fn into_vec(self) -> Vec<RecordId> {
        self.ids.into_iter().collect()
    }
}

impl IntoIterator for ReconciledIds {
    type Item = RecordId;
    type IntoIter = indexmap::set::IntoIter<RecordId>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.into_iter()
    }
}

impl<'a> IntoIterator for &'a ReconciledIds {
    type Item = &'a RecordId;
    type IntoIter = indexmap::set::Iter<'a, RecordId>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.iter()
    }
}

/// Read-after-write view over an eventually-consistent store.
pub struct Reconciler<E: QueryExecutor> {
    store: Arc<RecencyStore>,
    executor: Arc<E>,
    query_timeout: Option<Duration>,
}

impl<E: QueryExecutor> Clone for Reconciler<E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            executor: Arc::clone(&self.executor),
            query_timeout: self.query_timeout,
        }
    }
}

impl<E: QueryExecutor> std::fmt::Debug for Reconciler<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("store", &self.store)
            .field("query_timeout", &self.query_timeout)
            .finish_non_exhaustive()
    }
}

impl<E: QueryExecutor> Reconciler<E> {
    /// Create a reconciler; the query timeout comes from the configuration.
    pub fn new(store: Arc<RecencyStore>, executor: Arc<E>) -> Self {
        let query_timeout = store.resolver().config().query_timeout;
        Self {
            store,
            executor,
            query_timeout,
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    pub fn store(&self) -> &Arc<RecencyStore> {
        &self.store
    }

    pub fn executor(&self) -> &Arc<E> {
        &self.executor
    }

    /// Reconciled identifiers for `filter`, at most `limit` of them.
    pub async fn reconcile(
        &self,
        entity_type: &EntityType,
        filter: &Filter,
        limit: usize,
    ) -> Result<ReconciledIds, ReconcileError<E::Error>> {
        self.reconcile_with(
            entity_type,
            filter,
            &ReconcileOptions::new().with_limit(limit),
        )
        .await
    }

    /// [`Reconciler::reconcile`] with per-call options.
    pub async fn reconcile_with(
        &self,
        entity_type: &EntityType,
        filter: &Filter,
        options: &ReconcileOptions,
    ) -> Result<ReconciledIds, ReconcileError<E::Error>> {
        let limit = options.limit;
        let sweep = self.sweep(entity_type, options).await;
        let degraded = sweep.is_unavailable();
        if degraded {
            tracing::warn!(
                entity_type = %entity_type,
                failed_backends = sweep.failed,
                "Recency store unavailable, passing store query through"
            );
        }

        let deleted: HashSet<&RecordId> = sweep
            .filter(OperationSet::DELETED)
            .map(|entry| &entry.identifier)
            .collect();
        let recent = match_recent(&sweep, entity_type, filter);

        // Recent matches count against the budget even when the store
        // already returns them.
        let external_limit = limit.saturating_sub(recent.len());
        tracing::trace!(
            entity_type = %entity_type,
            limit,
            recent_matches = recent.len(),
            deleted = deleted.len(),
            external_limit,
            "Reconcile budget"
        );

        let store_ids = self
            .run_store_call(
                options,
                self.executor.execute(entity_type, filter, external_limit),
            )
            .await?;

        let mut stats = ReconcileStats {
            store_ids: store_ids.len(),
            recent_matches: recent.len(),
            external_limit,
            degraded,
            ..ReconcileStats::default()
        };
        let capacity = limit.min(store_ids.len() + recent.len());
        let mut ids: IndexSet<RecordId> = IndexSet::with_capacity(capacity);
        let candidates = store_ids
            .into_iter()
            .chain(recent.into_iter().map(|object| object.identifier));
        for id in candidates {
            if ids.len() >= limit {
                break;
            }
            if deleted.contains(&id) {
                stats.deleted_masked += 1;
                continue;
            }
            ids.insert(id);
        }

        Ok(ReconciledIds { ids, stats })
    }

    /// Recent objects matching `filter`, newest first.
    ///
    /// Uses the same matching rules as [`Reconciler::reconcile`] and never
    /// queries the external store.
    pub async fn get_recent_objects(
        &self,
        entity_type: &EntityType,
        filter: &Filter,
    ) -> Vec<RecentObject> {
        let sweep = self.sweep(entity_type, &ReconcileOptions::default()).await;
        match_recent(&sweep, entity_type, filter)
    }

    /// Reconcile, then load full records in reconciled order.
    ///
    /// Identifiers the fetcher cannot find yet fall back to their recorded
    /// snapshot; identifiers with neither are omitted.
    pub async fn reconcile_and_fetch<F>(
        &self,
        entity_type: &EntityType,
        filter: &Filter,
        options: &ReconcileOptions,
        fetcher: &F,
    ) -> Result<Vec<(RecordId, Record)>, ReconcileError<E::Error>>
    where
        F: RecordFetcher<Error = E::Error>,
    {
        let reconciled = self.reconcile_with(entity_type, filter, options).await?;
        if reconciled.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<RecordId> = reconciled.iter().cloned().collect();
        let fetched = self
            .run_store_call(options, fetcher.fetch_many(entity_type, &ids))
            .await?;
        let mut by_id: HashMap<RecordId, Record> = fetched.into_iter().collect();

        let missing = ids.iter().filter(|id| !by_id.contains_key(id)).count();
        if missing > 0 {
            let sweep = self.sweep(entity_type, options).await;
            for object in match_recent(&sweep, entity_type, filter) {
                if reconciled.contains(&object.identifier) {
                    by_id.entry(object.identifier).or_insert(object.snapshot);
                }
            }
        }

        Ok(ids
            .into_iter()
            .filter_map(|id| by_id.remove(&id).map(|record| (id, record)))
            .collect())
    }

    async fn sweep(&self, entity_type: &EntityType, options: &ReconcileOptions) -> RecencySweep {
        let timeout = options
            .backend_timeout
            .unwrap_or_else(|| self.store.backend_timeout());
        self.store.sweep_with_timeout(entity_type, timeout).await
    }

    async fn run_store_call<T, Fut>(
        &self,
        options: &ReconcileOptions,
        call: Fut,
    ) -> Result<T, ReconcileError<E::Error>>
    where
        Fut: std::future::Future<Output = Result<T, E::Error>>,
    {
        let result = match options.query_timeout.or(self.query_timeout) {
            Some(timeout) => tokio::time::timeout(timeout, call)
                .await
                .map_err(|_| ReconcileError::StoreQueryTimedOut { timeout })?,
            None => call.await,
        };
        result.map_err(ReconcileError::StoreQueryFailed)
    }
}

/// Additions in the sweep whose snapshot satisfies `filter`, newest first.
fn match_recent(
    sweep: &RecencySweep,
    entity_type: &EntityType,
    filter: &Filter,
) -> Vec<RecentObject> {
    sweep
        .filter(OperationSet::ADDITIONS)
        .filter_map(|entry| match evaluate(entry, filter) {
            Ok(true) => Some(RecentObject {
                identifier: entry.identifier.clone(),
                snapshot: entry.snapshot.clone().unwrap_or_default(),
                operation: entry.operation,
                recorded_at: entry.recorded_at,
            }),
            Ok(false) => None,
            Err(e) => {
                tracing::debug!(
                    entity_type = %entity_type,
                    identifier = %entry.identifier,
                    error = %e,
                    "Excluding recent candidate, filter could not be evaluated"
                );
                None
            }
        })
        .collect()
}

fn evaluate(entry: &RecencyEntry, filter: &Filter) -> Result<bool, PredicateError> {
    let snapshot = entry.snapshot.as_ref().ok_or(PredicateError::MissingSnapshot)?;
    filter.evaluate(snapshot)
}
