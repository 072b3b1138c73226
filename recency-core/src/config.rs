//! Configuration types
//!
//! The configuration tree is `{defaults, models}`: a default [`Policy`] plus
//! per-entity-type [`PolicyOverride`]s. It is built once at process start,
//! from YAML/JSON or programmatically, and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::predicate::Predicate;
use crate::{EntityType, Record};

/// Name of the backend used when nothing else is configured.
pub const DEFAULT_BACKEND: &str = "default";

/// Default retention for created/modified entries.
pub const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(60);

/// Default retention for deletion entries.
pub const DEFAULT_DELETION_WINDOW: Duration = Duration::from_secs(30);

/// Default backend timeout: one write, or one full read of a backend.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_millis(250);

/// Default result limit for reconciliation.
pub const DEFAULT_RESULT_LIMIT: usize = 1000;

/// Caching policy for an entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Policy {
    /// Record newly created objects.
    pub cache_on_creation: bool,
    /// Record modified objects.
    pub cache_on_modification: bool,
    /// Retention for created/modified entries, in seconds.
    #[serde(with = "duration_secs")]
    pub cache_time: Duration,
    /// Backends to write to, by registry name.
    pub caches: Vec<String>,
    /// Only record objects matching one of these. Empty matches everything.
    pub only_cache_matching: Vec<Predicate>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            cache_on_creation: false,
            cache_on_modification: false,
            cache_time: DEFAULT_CACHE_TIME,
            caches: vec![DEFAULT_BACKEND.to_string()],
            only_cache_matching: Vec::new(),
        }
    }
}

/// Per-entity-type override. Every unset field inherits from the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_on_creation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_on_modification: Option<bool>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "option_duration_secs"
    )]
    pub cache_time: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caches: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_cache_matching: Option<Vec<Predicate>>,
}

/// Master configuration for the recency engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecencyConfig {
    pub defaults: Policy,
    pub models: BTreeMap<EntityType, PolicyOverride>,
    /// Retention for deletion entries, in seconds. Sized to the store's
    /// inconsistency window.
    #[serde(with = "duration_secs")]
    pub deletion_window: Duration,
    /// Backend receiving deletion entries for types that do not cache
    /// additions.
    pub deletion_backend: String,
    /// Timeout for one backend write, or for reading all of one backend's
    /// entries during a sweep, in milliseconds.
    #[serde(with = "duration_millis")]
    pub backend_timeout: Duration,
    /// Timeout for the external store query, in milliseconds. Unset means
    /// the query may run as long as the executor allows.
    #[serde(with = "option_duration_millis", skip_serializing_if = "Option::is_none")]
    pub query_timeout: Option<Duration>,
}

impl Default for RecencyConfig {
    fn default() -> Self {
        Self {
            defaults: Policy::default(),
            models: BTreeMap::new(),
            deletion_window: DEFAULT_DELETION_WINDOW,
            deletion_backend: DEFAULT_BACKEND.to_string(),
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
            query_timeout: None,
        }
    }
}

impl RecencyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a YAML configuration document.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            format: "yaml".to_string(),
            reason: e.to_string(),
        })?;
        config.check()?;
        Ok(config)
    }

    /// Parse a JSON configuration document.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content).map_err(|e| ConfigError::Parse {
            format: "json".to_string(),
            reason: e.to_string(),
        })?;
        config.check()?;
        Ok(config)
    }

    /// Load from a file; `.json` files are parsed as JSON, anything else as YAML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    /// Apply `RECENCY_*` environment variable overrides.
    ///
    /// Environment variables:
    /// - `RECENCY_DEFAULT_CACHE_TIME_SECS`: default retention for additions
    /// - `RECENCY_DELETION_WINDOW_SECS`: retention for deletion entries
    /// - `RECENCY_DELETION_BACKEND`: backend receiving deletion entries
    /// - `RECENCY_BACKEND_TIMEOUT_MS`: backend timeout
    /// - `RECENCY_QUERY_TIMEOUT_MS`: external query timeout (0 disables)
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secs) = parse_var::<u64, _>(&lookup, "RECENCY_DEFAULT_CACHE_TIME_SECS")? {
            self.defaults.cache_time = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "RECENCY_DELETION_WINDOW_SECS")? {
            self.deletion_window = Duration::from_secs(secs);
        }
        if let Some(backend) = lookup("RECENCY_DELETION_BACKEND") {
            let backend = backend.trim().to_string();
            if !backend.is_empty() {
                self.deletion_backend = backend;
            }
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "RECENCY_BACKEND_TIMEOUT_MS")? {
            self.backend_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "RECENCY_QUERY_TIMEOUT_MS")? {
            self.query_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        self.check()?;
        Ok(self)
    }

    /// Set the default policy.
    pub fn with_defaults(mut self, defaults: Policy) -> Self {
        self.defaults = defaults;
        self
    }

    /// Set the override for one entity type.
    pub fn with_model(mut self, entity_type: impl Into<EntityType>, policy: PolicyOverride) -> Self {
        self.models.insert(entity_type.into(), policy);
        self
    }

    /// Set the deletion retention window.
    pub fn with_deletion_window(mut self, window: Duration) -> Self {
        self.deletion_window = window;
        self
    }

    /// Set the deletion backend.
    pub fn with_deletion_backend(mut self, backend: impl Into<String>) -> Self {
        self.deletion_backend = backend.into();
        self
    }

    /// Set the backend timeout.
    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    /// Set the external query timeout.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Register a function predicate for an entity type.
    ///
    /// The predicate is appended to the type's own `only_cache_matching`
    /// list. If the type has no list of its own yet, it gets one, so the
    /// default list no longer applies to it.
    pub fn with_custom_predicate<F>(
        mut self,
        entity_type: impl Into<EntityType>,
        name: impl Into<String>,
        func: F,
    ) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.models
            .entry(entity_type.into())
            .or_default()
            .only_cache_matching
            .get_or_insert_with(Vec::new)
            .push(Predicate::custom(name, func));
        self
    }

    /// Check that every backend named anywhere in the tree is known.
    pub fn validate_backends<'a, I>(&self, known: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let known: HashSet<&str> = known.into_iter().collect();
        let unknown = |entity_type: &str, backend: &str| ConfigError::UnknownBackend {
            entity_type: EntityType::from(entity_type),
            backend: backend.to_string(),
        };
        if !known.contains(self.deletion_backend.as_str()) {
            return Err(unknown("*", &self.deletion_backend));
        }
        if let Some(backend) = self.defaults.caches.iter().find(|b| !known.contains(b.as_str())) {
            return Err(unknown("*", backend));
        }
        for (entity_type, policy) in &self.models {
            if let Some(caches) = &policy.caches {
                if let Some(backend) = caches.iter().find(|b| !known.contains(b.as_str())) {
                    return Err(unknown(entity_type.as_str(), backend));
                }
            }
        }
        Ok(())
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.deletion_backend.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "deletion_backend".to_string(),
                value: String::new(),
                reason: "must name a backend".to_string(),
            });
        }
        if self.deletion_window.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "deletion_window".to_string(),
                value: "0".to_string(),
                reason: "deletion entries need a non-zero retention".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: name.to_string(),
                value: raw.clone(),
                reason: "expected a non-negative integer".to_string(),
            }),
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod option_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const YAML: &str = r#"
defaults:
  cache_on_creation: false
  cache_time: 60
  caches: [default]
models:
  article:
    cache_on_creation: true
    only_cache_matching:
      - name: Ted
      - age__gte: 18
  comment:
    caches: [default, session]
deletion_window: 15
backend_timeout: 100
"#;

    #[test]
    fn test_yaml_config_parses() {
        let config = RecencyConfig::from_yaml_str(YAML).unwrap();
        assert!(!config.defaults.cache_on_creation);
        assert_eq!(config.defaults.cache_time, Duration::from_secs(60));
        assert_eq!(config.deletion_window, Duration::from_secs(15));
        assert_eq!(config.backend_timeout, Duration::from_millis(100));
        assert_eq!(config.query_timeout, None);

        let article = &config.models[&EntityType::from("article")];
        assert_eq!(article.cache_on_creation, Some(true));
        assert_eq!(article.cache_time, None);
        assert_eq!(article.only_cache_matching.as_ref().map(Vec::len), Some(2));

        let comment = &config.models[&EntityType::from("comment")];
        assert_eq!(
            comment.caches.as_deref(),
            Some(&["default".to_string(), "session".to_string()][..])
        );
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = RecencyConfig::from_yaml_str("defaults:\n  cache_forever: true\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_json_config_parses() {
        let config = RecencyConfig::from_json_str(
            r#"{"defaults": {"cache_on_creation": true}, "query_timeout": 2000}"#,
        )
        .unwrap();
        assert!(config.defaults.cache_on_creation);
        assert_eq!(config.defaults.caches, vec![DEFAULT_BACKEND.to_string()]);
        assert_eq!(config.query_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_from_path_dispatches_on_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let yaml_path = dir.path().join("recency.yaml");
        std::fs::write(&yaml_path, YAML).unwrap();
        assert!(RecencyConfig::from_path(&yaml_path).is_ok());

        let json_path = dir.path().join("recency.json");
        std::fs::write(&json_path, r#"{"deletion_window": 5}"#).unwrap();
        let config = RecencyConfig::from_path(&json_path).unwrap();
        assert_eq!(config.deletion_window, Duration::from_secs(5));

        let err = RecencyConfig::from_path(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_zero_deletion_window_rejected() {
        let err = RecencyConfig::from_yaml_str("deletion_window: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("RECENCY_DEFAULT_CACHE_TIME_SECS", "120"),
            ("RECENCY_DELETION_WINDOW_SECS", "9"),
            ("RECENCY_DELETION_BACKEND", "session"),
            ("RECENCY_BACKEND_TIMEOUT_MS", "50"),
            ("RECENCY_QUERY_TIMEOUT_MS", "0"),
        ]
        .into_iter()
        .collect();
        let config = RecencyConfig::new()
            .with_query_timeout(Duration::from_secs(1))
            .with_overrides_from(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.defaults.cache_time, Duration::from_secs(120));
        assert_eq!(config.deletion_window, Duration::from_secs(9));
        assert_eq!(config.deletion_backend, "session");
        assert_eq!(config.backend_timeout, Duration::from_millis(50));
        assert_eq!(config.query_timeout, None);
    }

    #[test]
    fn test_invalid_override_is_error() {
        let err = RecencyConfig::new()
            .with_overrides_from(|name| {
                (name == "RECENCY_BACKEND_TIMEOUT_MS").then(|| "soon".to_string())
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_validate_backends() {
        let config = RecencyConfig::from_yaml_str(YAML).unwrap();
        assert!(config.validate_backends(["default", "session"]).is_ok());
        let err = config.validate_backends(["default"]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownBackend {
                entity_type: EntityType::from("comment"),
                backend: "session".to_string(),
            }
        );
    }

    #[test]
    fn test_custom_predicate_registration() {
        let config = RecencyConfig::new().with_custom_predicate("article", "published", |r| {
            r.get("published") == Some(&serde_json::Value::Bool(true))
        });
        let article = &config.models[&EntityType::from("article")];
        assert_eq!(article.only_cache_matching.as_ref().map(Vec::len), Some(1));
        assert_eq!(article.cache_on_creation, None);
    }
}
