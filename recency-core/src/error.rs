//! Error types for recency operations

use crate::EntityType;
use std::time::Duration;
use thiserror::Error;

/// Cache backend errors.
///
/// Every variant is non-fatal to the engine: a failing backend contributes
/// nothing to a read and is skipped on a write.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Backend call timed out after {timeout:?}")]
    TimedOut { timeout: Duration },

    #[error("Corrupt cache entry at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl BackendError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

/// Errors raised while evaluating a predicate against a record snapshot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PredicateError {
    #[error("Field not present in snapshot: {field}")]
    MissingField { field: String },

    #[error("Type mismatch on {field}: expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    #[error("Invalid lookup {lookup}: {reason}")]
    InvalidLookup { lookup: String, reason: String },

    #[error("No snapshot recorded for this entry")]
    MissingSnapshot,
}

/// Configuration errors.
///
/// Only raised while loading or validating configuration. Resolving the
/// policy of an unknown entity type is never an error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to parse {format} configuration: {reason}")]
    Parse { format: String, reason: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Policy for {entity_type} names unknown cache backend {backend}")]
    UnknownBackend {
        entity_type: EntityType,
        backend: String,
    },

    #[error("Failed to read configuration from {path}: {reason}")]
    Io { path: String, reason: String },
}

/// Master error type for recency operations.
#[derive(Debug, Clone, Error)]
pub enum RecencyError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Predicate error: {0}")]
    Predicate(#[from] PredicateError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },
}

impl From<serde_json::Error> for RecencyError {
    fn from(e: serde_json::Error) -> Self {
        RecencyError::Serialization {
            reason: e.to_string(),
        }
    }
}

/// Result type alias for recency operations.
pub type RecencyResult<T> = Result<T, RecencyError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display_unavailable() {
        let err = BackendError::unavailable("connection refused");
        let msg = format!("{}", err);
        assert!(msg.contains("unavailable"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_backend_error_display_timed_out() {
        let err = BackendError::TimedOut {
            timeout: Duration::from_millis(250),
        };
        assert!(format!("{}", err).contains("250ms"));
    }

    #[test]
    fn test_predicate_error_display_type_mismatch() {
        let err = PredicateError::TypeMismatch {
            field: "age".to_string(),
            expected: "number".to_string(),
            found: "string".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("age"));
        assert!(msg.contains("number"));
        assert!(msg.contains("string"));
    }

    #[test]
    fn test_config_error_display_unknown_backend() {
        let err = ConfigError::UnknownBackend {
            entity_type: EntityType::from("article"),
            backend: "redis".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("article"));
        assert!(msg.contains("redis"));
    }

    #[test]
    fn test_recency_error_from_variants() {
        let backend = RecencyError::from(BackendError::unavailable("down"));
        assert!(matches!(backend, RecencyError::Backend(_)));

        let predicate = RecencyError::from(PredicateError::MissingSnapshot);
        assert!(matches!(predicate, RecencyError::Predicate(_)));

        let config = RecencyError::from(ConfigError::Parse {
            format: "yaml".to_string(),
            reason: "bad indent".to_string(),
        });
        assert!(matches!(config, RecencyError::Config(_)));

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let serialization = RecencyError::from(json_err);
        assert!(matches!(serialization, RecencyError::Serialization { .. }));
    }
}
