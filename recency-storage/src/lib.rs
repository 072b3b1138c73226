//! Recency Storage - Cache Backends and Reconciliation
//!
//! Records recent mutations in short-lived cache entries and merges them
//! into query results from an eventually-consistent store, so a client sees
//! its own writes before the store's indexes catch up.
//!
//! - [`MutationRecorder`] applies caching policy to inbound mutation events
//! - [`RecencyStore`] reads and writes entries across named cache backends
//! - [`Reconciler`] combines store query results with the recency view

pub mod cache;
pub mod reconcile;
pub mod recorder;
pub mod store;

pub use cache::{
    BackendRegistry, BackendStats, CacheBackend, InMemoryBackend, LmdbBackend, LmdbBackendError,
    RecencyKey,
};
pub use reconcile::{
    QueryExecutor, ReconcileError, ReconcileOptions, ReconcileStats, ReconciledIds, Reconciler,
    RecentObject, RecordFetcher,
};
pub use recorder::{MutationRecorder, RecordDecision};
pub use store::{RecencyEntry, RecencyStore, RecencySweep, RecordOutcome};
