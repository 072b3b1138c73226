//! Match predicates deciding whether a mutated record is cacheable.

use serde::de::Deserializer;
use serde::ser::{Error as _, SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::PredicateError;
use crate::filter::FilterExpr;
use crate::Record;

/// Host-supplied predicate function.
#[derive(Clone)]
pub struct CustomPredicate {
    name: String,
    func: Arc<dyn Fn(&Record) -> bool + Send + Sync>,
}

impl CustomPredicate {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, record: &Record) -> bool {
        (self.func)(record)
    }
}

impl fmt::Debug for CustomPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomPredicate")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl PartialEq for CustomPredicate {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

/// One entry of a policy's `only_cache_matching` list.
///
/// `Fields` is a conjunction of field lookups, written in configuration as
/// a mapping such as `{"name": "Ted", "age__gte": 18}`. `Custom` wraps an
/// arbitrary function and can only be registered programmatically.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Fields(Vec<FilterExpr>),
    Custom(CustomPredicate),
}

impl Predicate {
    /// Parse a lookup mapping into a `Fields` predicate.
    pub fn from_lookups(lookups: &Record) -> Result<Self, PredicateError> {
        lookups
            .iter()
            .map(|(key, value)| FilterExpr::from_lookup(key, value.clone()))
            .collect::<Result<Vec<_>, _>>()
            .map(Self::Fields)
    }

    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        Self::Custom(CustomPredicate::new(name, func))
    }

    /// Evaluate against a snapshot.
    pub fn evaluate(&self, record: &Record) -> Result<bool, PredicateError> {
        match self {
            Self::Fields(exprs) => {
                for expr in exprs {
                    if !expr.evaluate(record)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Custom(custom) => Ok(custom.call(record)),
        }
    }
}

/// True if the snapshot satisfies ANY predicate, or the list is empty.
///
/// A predicate that cannot be evaluated (missing field, type mismatch)
/// counts as not matching. A missing snapshot only matches the empty list.
pub fn matches_any(predicates: &[Predicate], snapshot: Option<&Record>) -> bool {
    if predicates.is_empty() {
        return true;
    }
    let Some(record) = snapshot else {
        return false;
    };
    predicates.iter().any(|predicate| match predicate.evaluate(record) {
        Ok(matched) => matched,
        Err(e) => {
            tracing::trace!(error = %e, "Cache predicate not evaluable, treating as non-match");
            false
        }
    })
}

impl Serialize for Predicate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Fields(exprs) => {
                let mut map = serializer.serialize_map(Some(exprs.len()))?;
                for expr in exprs {
                    map.serialize_entry(&expr.lookup_key(), &expr.value)?;
                }
                map.end()
            }
            Self::Custom(custom) => Err(S::Error::custom(format!(
                "custom predicate {} cannot be serialized",
                custom.name()
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for Predicate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let lookups = Record::deserialize(deserializer)?;
        Predicate::from_lookups(&lookups).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_empty_list_matches_everything() {
        assert!(matches_any(&[], None));
        assert!(matches_any(&[], Some(&record(json!({"name": "Bob"})))));
    }

    #[test]
    fn test_fields_predicate_is_conjunction() {
        let p = Predicate::from_lookups(&record(json!({"name": "Ted", "age__gte": 18}))).unwrap();
        assert!(p.evaluate(&record(json!({"name": "Ted", "age": 20}))).unwrap());
        assert!(!p.evaluate(&record(json!({"name": "Ted", "age": 10}))).unwrap());
    }

    #[test]
    fn test_list_is_disjunction() {
        let predicates = vec![
            Predicate::from_lookups(&record(json!({"name": "Ted"}))).unwrap(),
            Predicate::custom("is_admin", |r| r.get("admin") == Some(&json!(true))),
        ];
        assert!(matches_any(&predicates, Some(&record(json!({"name": "Ted"})))));
        assert!(matches_any(
            &predicates,
            Some(&record(json!({"name": "Bob", "admin": true})))
        ));
        assert!(!matches_any(&predicates, Some(&record(json!({"name": "Bob"})))));
    }

    #[test]
    fn test_missing_snapshot_does_not_match_non_empty_list() {
        let predicates = vec![Predicate::from_lookups(&record(json!({"name": "Ted"}))).unwrap()];
        assert!(!matches_any(&predicates, None));
    }

    #[test]
    fn test_unevaluable_predicate_is_non_match() {
        let predicates = vec![Predicate::from_lookups(&record(json!({"age__gt": 3}))).unwrap()];
        assert!(!matches_any(&predicates, Some(&record(json!({"name": "Ted"})))));
    }

    #[test]
    fn test_predicate_serde() {
        let p: Predicate = serde_json::from_value(json!({"name": "Ted", "age__lt": 40})).unwrap();
        let back = serde_json::to_value(&p).unwrap();
        assert_eq!(back, json!({"name": "Ted", "age__lt": 40}));

        let custom = Predicate::custom("never", |_| false);
        assert!(serde_json::to_value(&custom).is_err());
        assert!(serde_json::from_value::<Predicate>(json!({"tags__in": 3})).is_err());
    }

    #[test]
    fn test_custom_predicate_equality_is_identity() {
        let a = Predicate::custom("a", |_| true);
        let b = Predicate::custom("a", |_| true);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
