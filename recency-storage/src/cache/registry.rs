//! Named cache backends supplied by the host application.

use std::collections::HashMap;
use std::sync::Arc;

use recency_core::{ConfigError, RecencyConfig};

use super::traits::CacheBackend;

/// Maps the backend names used in configuration to live backends.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn CacheBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with_backend(mut self, name: impl Into<String>, backend: Arc<dyn CacheBackend>) -> Self {
        self.register(name, backend);
        self
    }

    /// Register a backend, returning the one it replaced.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        backend: Arc<dyn CacheBackend>,
    ) -> Option<Arc<dyn CacheBackend>> {
        self.backends.insert(name.into(), backend)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn CacheBackend>> {
        self.backends.get(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Check that every backend the configuration names is registered.
    pub fn validate(&self, config: &RecencyConfig) -> Result<(), ConfigError> {
        config.validate_backends(self.backends.keys().map(String::as_str))
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}
