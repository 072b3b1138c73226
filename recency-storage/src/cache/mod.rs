//! Cache backends for recency entries.
//!
//! The recency store talks to physical caches only through the
//! [`CacheBackend`] trait. Hosts register named backends in a
//! [`BackendRegistry`]; policies refer to them by name.
//!
//! # Backends
//!
//! - [`InMemoryBackend`]: per-process map with lazy TTL expiry
//! - [`LmdbBackend`]: memory-mapped store shared across processes
//!
//! All keys are built with [`RecencyKey`], which scopes every entry to its
//! entity type.

mod key;
mod lmdb_backend;
mod memory;
mod registry;
mod traits;

pub use key::RecencyKey;
pub use lmdb_backend::{LmdbBackend, LmdbBackendError};
pub use memory::InMemoryBackend;
pub use registry::BackendRegistry;
pub use traits::{BackendStats, CacheBackend};
