//! Policy resolution: defaults merged with per-entity-type overrides.

use std::sync::Arc;
use std::time::Duration;

use crate::config::RecencyConfig;
use crate::predicate::{matches_any, Predicate};
use crate::{EntityType, Operation, Record};

/// Fully resolved caching policy for one entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectivePolicy {
    pub entity_type: EntityType,
    pub cache_on_creation: bool,
    pub cache_on_modification: bool,
    pub cache_time: Duration,
    /// Backend names in configuration order, without duplicates.
    pub backends: Vec<String>,
    pub match_predicates: Vec<Predicate>,
    pub deletion_window: Duration,
    pub deletion_backend: String,
}

impl EffectivePolicy {
    /// True if either creations or modifications are cached.
    pub fn caches_additions(&self) -> bool {
        self.cache_on_creation || self.cache_on_modification
    }

    /// Whether the policy enables recording for this operation at all.
    ///
    /// Deletions are always recorded.
    pub fn records(&self, operation: Operation) -> bool {
        match operation {
            Operation::Created => self.cache_on_creation,
            Operation::Modified => self.cache_on_modification,
            Operation::Deleted => true,
        }
    }

    /// Whether a snapshot passes the `only_cache_matching` list.
    pub fn matches(&self, snapshot: Option<&Record>) -> bool {
        matches_any(&self.match_predicates, snapshot)
    }

    /// Retention for an entry of the given operation.
    ///
    /// A deletion written to the policy's backends lives at least as long as
    /// the additions it may shadow there, so a backend that missed the
    /// deletion cannot resurface an addition after the deletion expires.
    pub fn ttl_for(&self, operation: Operation) -> Duration {
        match operation {
            Operation::Deleted if self.deletions_use_policy_backends() => {
                self.deletion_window.max(self.cache_time)
            }
            Operation::Deleted => self.deletion_window,
            Operation::Created | Operation::Modified => self.cache_time,
        }
    }

    /// Backends an entry of the given operation is written to.
    ///
    /// Deletions go to the policy's backends when the type caches additions,
    /// and to the deletion backend otherwise.
    pub fn write_backends(&self, operation: Operation) -> Vec<&str> {
        let use_policy = match operation {
            Operation::Deleted => self.deletions_use_policy_backends(),
            Operation::Created | Operation::Modified => true,
        };
        if use_policy {
            self.backends.iter().map(String::as_str).collect()
        } else {
            vec![self.deletion_backend.as_str()]
        }
    }

    fn deletions_use_policy_backends(&self) -> bool {
        self.caches_additions() && !self.backends.is_empty()
    }

    /// Every backend that may hold entries for this type.
    pub fn read_backends(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.iter().map(String::as_str).collect();
        if !names.contains(&self.deletion_backend.as_str()) {
            names.push(self.deletion_backend.as_str());
        }
        names
    }
}

/// Resolves effective policies from an immutable [`RecencyConfig`].
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    config: Arc<RecencyConfig>,
}

impl ConfigResolver {
    pub fn new(config: RecencyConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn from_shared(config: Arc<RecencyConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RecencyConfig {
        &self.config
    }

    /// Resolve the policy for an entity type.
    ///
    /// Each field is inherited independently: an override that only sets
    /// `cache_on_creation` still picks up the default `cache_time`, backends
    /// and predicates. Types with no override resolve to the defaults.
    pub fn resolve(&self, entity_type: &EntityType) -> EffectivePolicy {
        let defaults = &self.config.defaults;
        let overrides = self.config.models.get(entity_type);
        if overrides.is_none() {
            tracing::debug!(entity_type = %entity_type, "No policy override, using defaults");
        }

        let cache_on_creation = overrides
            .and_then(|o| o.cache_on_creation)
            .unwrap_or(defaults.cache_on_creation);
        let cache_on_modification = overrides
            .and_then(|o| o.cache_on_modification)
            .unwrap_or(defaults.cache_on_modification);
        let cache_time = overrides
            .and_then(|o| o.cache_time)
            .unwrap_or(defaults.cache_time);
        let caches = overrides
            .and_then(|o| o.caches.as_ref())
            .unwrap_or(&defaults.caches);
        let match_predicates = overrides
            .and_then(|o| o.only_cache_matching.as_ref())
            .unwrap_or(&defaults.only_cache_matching)
            .clone();

        let mut backends: Vec<String> = Vec::with_capacity(caches.len());
        for name in caches {
            if !backends.contains(name) {
                backends.push(name.clone());
            }
        }

        EffectivePolicy {
            entity_type: entity_type.clone(),
            cache_on_creation,
            cache_on_modification,
            cache_time,
            backends,
            match_predicates,
            deletion_window: self.config.deletion_window,
            deletion_backend: self.config.deletion_backend.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Policy, PolicyOverride};
    use proptest::prelude::*;
    use serde_json::json;

    fn resolver() -> ConfigResolver {
        let config = RecencyConfig::new()
            .with_defaults(Policy {
                cache_on_creation: false,
                cache_on_modification: true,
                cache_time: Duration::from_secs(60),
                caches: vec!["default".to_string()],
                only_cache_matching: vec![],
            })
            .with_model(
                "article",
                PolicyOverride {
                    cache_on_creation: Some(true),
                    caches: Some(vec![
                        "session".to_string(),
                        "default".to_string(),
                        "session".to_string(),
                    ]),
                    ..Default::default()
                },
            )
            .with_model(
                "secret",
                PolicyOverride {
                    cache_on_modification: Some(false),
                    ..Default::default()
                },
            );
        ConfigResolver::new(config)
    }

    #[test]
    fn test_unknown_type_resolves_to_defaults() {
        let policy = resolver().resolve(&EntityType::from("unknown"));
        assert!(!policy.cache_on_creation);
        assert!(policy.cache_on_modification);
        assert_eq!(policy.cache_time, Duration::from_secs(60));
        assert_eq!(policy.backends, vec!["default".to_string()]);
        assert!(policy.match_predicates.is_empty());
    }

    #[test]
    fn test_field_level_inheritance() {
        let policy = resolver().resolve(&EntityType::from("article"));
        assert!(policy.cache_on_creation);
        // Not overridden: inherited.
        assert!(policy.cache_on_modification);
        assert_eq!(policy.cache_time, Duration::from_secs(60));
        // Deduplicated, order preserved.
        assert_eq!(
            policy.backends,
            vec!["session".to_string(), "default".to_string()]
        );
    }

    #[test]
    fn test_deletions_always_recorded() {
        let policy = resolver().resolve(&EntityType::from("secret"));
        assert!(!policy.caches_additions());
        assert!(!policy.records(Operation::Created));
        assert!(!policy.records(Operation::Modified));
        assert!(policy.records(Operation::Deleted));
        assert_eq!(policy.ttl_for(Operation::Deleted), policy.deletion_window);
    }

    #[test]
    fn test_deletion_backend_selection() {
        let r = ConfigResolver::new(
            RecencyConfig::new()
                .with_deletion_backend("deletions")
                .with_model(
                    "article",
                    PolicyOverride {
                        cache_on_creation: Some(true),
                        ..Default::default()
                    },
                ),
        );
        let article = r.resolve(&EntityType::from("article"));
        assert_eq!(article.write_backends(Operation::Deleted), vec!["default"]);
        assert_eq!(article.read_backends(), vec!["default", "deletions"]);

        let plain = r.resolve(&EntityType::from("plain"));
        assert_eq!(plain.write_backends(Operation::Deleted), vec!["deletions"]);
        assert_eq!(plain.write_backends(Operation::Created), vec!["default"]);
    }

    #[test]
    fn test_deletion_outlives_additions_it_shadows() {
        let r = ConfigResolver::new(
            RecencyConfig::new()
                .with_deletion_window(Duration::from_secs(30))
                .with_model(
                    "article",
                    PolicyOverride {
                        cache_on_creation: Some(true),
                        cache_time: Some(Duration::from_secs(60)),
                        ..Default::default()
                    },
                )
                .with_model(
                    "brief",
                    PolicyOverride {
                        cache_on_creation: Some(true),
                        cache_time: Some(Duration::from_secs(5)),
                        ..Default::default()
                    },
                ),
        );
        let article = r.resolve(&EntityType::from("article"));
        assert_eq!(article.ttl_for(Operation::Deleted), Duration::from_secs(60));
        assert_eq!(article.ttl_for(Operation::Created), Duration::from_secs(60));

        let brief = r.resolve(&EntityType::from("brief"));
        assert_eq!(brief.ttl_for(Operation::Deleted), Duration::from_secs(30));

        // Deletion backend only: the window applies as configured.
        let plain = r.resolve(&EntityType::from("plain"));
        assert_eq!(plain.ttl_for(Operation::Deleted), Duration::from_secs(30));
    }

    #[test]
    fn test_override_predicates_replace_defaults() {
        let mut defaults = Policy::default();
        defaults.only_cache_matching = vec![Predicate::from_lookups(
            json!({"name": "Ted"}).as_object().unwrap(),
        )
        .unwrap()];
        let r = ConfigResolver::new(
            RecencyConfig::new()
                .with_defaults(defaults)
                .with_model(
                    "open",
                    PolicyOverride {
                        only_cache_matching: Some(vec![]),
                        ..Default::default()
                    },
                ),
        );
        let bob = json!({"name": "Bob"}).as_object().cloned().unwrap();
        assert!(!r.resolve(&EntityType::from("closed")).matches(Some(&bob)));
        assert!(r.resolve(&EntityType::from("open")).matches(Some(&bob)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// An explicit override always wins; an unset one always inherits.
        #[test]
        fn prop_each_field_resolves_independently(
            default_create in any::<bool>(),
            default_modify in any::<bool>(),
            default_secs in 1u64..3600,
            create in proptest::option::of(any::<bool>()),
            modify in proptest::option::of(any::<bool>()),
            secs in proptest::option::of(1u64..3600),
        ) {
            let config = RecencyConfig::new()
                .with_defaults(Policy {
                    cache_on_creation: default_create,
                    cache_on_modification: default_modify,
                    cache_time: Duration::from_secs(default_secs),
                    ..Policy::default()
                })
                .with_model("t", PolicyOverride {
                    cache_on_creation: create,
                    cache_on_modification: modify,
                    cache_time: secs.map(Duration::from_secs),
                    ..Default::default()
                });
            let policy = ConfigResolver::new(config).resolve(&EntityType::from("t"));
            prop_assert_eq!(policy.cache_on_creation, create.unwrap_or(default_create));
            prop_assert_eq!(policy.cache_on_modification, modify.unwrap_or(default_modify));
            prop_assert_eq!(policy.cache_time, Duration::from_secs(secs.unwrap_or(default_secs)));
        }
    }
}
