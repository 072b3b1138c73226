//! Entity-type-scoped cache keys for recency entries.
//!
//! A `RecencyKey` cannot be built without an entity type, and its encoding
//! length-prefixes the type name, so a prefix scan for one type can never
//! return keys written for another (`article` vs `article:draft`).

use recency_core::{EntityType, RecordId};

/// Namespace shared by every key this crate writes.
const NAMESPACE: &str = "recency";

/// Separator between key segments.
const SEPARATOR: char = ':';

/// Cache key for the recency entry of one record.
///
/// # Format
///
/// `recency:<type byte length>:<entity type>:<identifier fragment>`, where the
/// identifier fragment is `i:<integer>` or `s:<text>`. Example:
/// `recency:7:article:i:42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecencyKey {
    inner: KeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct KeyInner {
    entity_type: EntityType,
    identifier: RecordId,
}

impl RecencyKey {
    pub fn new(entity_type: EntityType, identifier: RecordId) -> Self {
        Self {
            inner: KeyInner {
                entity_type,
                identifier,
            },
        }
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.inner.entity_type
    }

    pub fn identifier(&self) -> &RecordId {
        &self.inner.identifier
    }

    /// Encode to the backend key string.
    pub fn encode(&self) -> String {
        format!(
            "{}{}",
            Self::type_prefix(&self.inner.entity_type),
            self.inner.identifier.key_fragment()
        )
    }

    /// Prefix shared by every key of an entity type.
    pub fn type_prefix(entity_type: &EntityType) -> String {
        let name = entity_type.as_str();
        format!(
            "{NAMESPACE}{SEPARATOR}{}{SEPARATOR}{name}{SEPARATOR}",
            name.len()
        )
    }

    /// Decode a key produced by [`RecencyKey::encode`].
    ///
    /// Returns `None` for foreign keys, a bad length prefix, or an
    /// identifier fragment that is neither `i:<int>` nor `s:<text>`.
    pub fn decode(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(NAMESPACE)?.strip_prefix(SEPARATOR)?;
        let (len, rest) = rest.split_once(SEPARATOR)?;
        let len: usize = len.parse().ok()?;
        if rest.len() < len || !rest.is_char_boundary(len) {
            return None;
        }
        let (name, rest) = rest.split_at(len);
        let fragment = rest.strip_prefix(SEPARATOR)?;

        let identifier = if let Some(n) = fragment.strip_prefix("i:") {
            RecordId::Int(n.parse().ok()?)
        } else if let Some(s) = fragment.strip_prefix("s:") {
            RecordId::Text(s.to_string())
        } else {
            return None;
        };

        Some(Self::new(EntityType::from(name), identifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_format() {
        let key = RecencyKey::new(EntityType::from("article"), RecordId::Int(42));
        assert_eq!(key.encode(), "recency:7:article:i:42");
    }

    #[test]
    fn test_decode_inverts_encode() {
        for identifier in [
            RecordId::Int(-3),
            RecordId::Text("a:b:c".to_string()),
            RecordId::Text(String::new()),
        ] {
            let key = RecencyKey::new(EntityType::from("blog:post"), identifier);
            assert_eq!(RecencyKey::decode(&key.encode()), Some(key));
        }
    }

    #[test]
    fn test_decode_rejects_foreign_keys() {
        assert!(RecencyKey::decode("session:abc").is_none());
        assert!(RecencyKey::decode("recency:99:article:i:1").is_none());
        assert!(RecencyKey::decode("recency:7:article:x:1").is_none());
        assert!(RecencyKey::decode("recency:7:article:i:notanumber").is_none());
        assert!(RecencyKey::decode("recency:1:\u{e9}:i:1").is_none());
    }

    #[test]
    fn test_prefix_does_not_cross_types() {
        let short = RecencyKey::type_prefix(&EntityType::from("article"));
        let long = RecencyKey::new(EntityType::from("article:draft"), RecordId::Int(1)).encode();
        assert!(!long.starts_with(&short));

        let own = RecencyKey::new(EntityType::from("article"), RecordId::Int(1)).encode();
        assert!(own.starts_with(&short));
    }

    #[test]
    fn test_variants_get_distinct_keys() {
        let t = EntityType::from("article");
        let int_key = RecencyKey::new(t.clone(), RecordId::Int(7)).encode();
        let text_key = RecencyKey::new(t, RecordId::Text("7".to_string())).encode();
        assert_ne!(int_key, text_key);
    }
}
