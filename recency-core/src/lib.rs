//! Recency Core - Types and Policy Resolution
//!
//! Pure data structures and the configuration resolver for the recency
//! reconciliation engine. Nothing in this crate performs I/O beyond loading
//! a configuration file; cache backends and the engine live in
//! `recency-storage`.

pub mod config;
pub mod error;
pub mod filter;
pub mod identity;
pub mod mutation;
pub mod predicate;
pub mod resolver;

pub use config::{
    Policy, PolicyOverride, RecencyConfig, DEFAULT_BACKEND, DEFAULT_BACKEND_TIMEOUT,
    DEFAULT_CACHE_TIME, DEFAULT_DELETION_WINDOW, DEFAULT_RESULT_LIMIT,
};
pub use error::{
    BackendError, ConfigError, PredicateError, RecencyError, RecencyResult,
};
pub use filter::{Filter, FilterExpr, FilterOperator};
pub use identity::{EntityType, Record, RecordId, Timestamp};
pub use mutation::{MutationEvent, Operation, OperationSet};
pub use predicate::{matches_any, CustomPredicate, Predicate};
pub use resolver::{ConfigResolver, EffectivePolicy};
