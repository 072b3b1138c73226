//! Mutation operations and the inbound mutation event.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{EntityType, Record, RecordId};

/// Kind of mutation applied to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Created,
    Modified,
    Deleted,
}

impl Operation {
    /// The single-operation set containing this operation.
    pub fn as_set(self) -> OperationSet {
        match self {
            Self::Created => OperationSet::CREATED,
            Self::Modified => OperationSet::MODIFIED,
            Self::Deleted => OperationSet::DELETED,
        }
    }

    /// True for operations that make a record visible (create/modify).
    pub fn is_addition(self) -> bool {
        !matches!(self, Self::Deleted)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Filter over mutation operations, used when reading recent entries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OperationSet: u8 {
        const CREATED = 0b0000_0001;
        const MODIFIED = 0b0000_0010;
        const DELETED = 0b0000_0100;
        /// Operations that add or refresh a record in query results.
        const ADDITIONS = Self::CREATED.bits() | Self::MODIFIED.bits();
        const ANY = Self::ADDITIONS.bits() | Self::DELETED.bits();
    }
}

impl OperationSet {
    pub fn includes(self, operation: Operation) -> bool {
        self.contains(operation.as_set())
    }
}

impl Default for OperationSet {
    fn default() -> Self {
        Self::ANY
    }
}

// bitflags 2.x serde support serializes as a flag string; keep the compact integer form
impl Serialize for OperationSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OperationSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u8::deserialize(deserializer)?;
        Self::from_bits(bits).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid OperationSet bits: {:#04x}", bits))
        })
    }
}

/// Inbound notification that a record was created, modified or deleted.
///
/// Delivered by the host application (ORM hooks, change-data-capture, a
/// queue consumer). At-least-once delivery is safe: recording the same event
/// twice leaves the recency cache in the same state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub entity_type: EntityType,
    pub identifier: RecordId,
    pub operation: Operation,
    #[serde(default)]
    pub snapshot: Option<Record>,
}

impl MutationEvent {
    pub fn new(
        entity_type: impl Into<EntityType>,
        identifier: impl Into<RecordId>,
        operation: Operation,
        snapshot: Option<Record>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            identifier: identifier.into(),
            operation,
            snapshot,
        }
    }

    pub fn created(
        entity_type: impl Into<EntityType>,
        identifier: impl Into<RecordId>,
        snapshot: Record,
    ) -> Self {
        Self::new(entity_type, identifier, Operation::Created, Some(snapshot))
    }

    pub fn modified(
        entity_type: impl Into<EntityType>,
        identifier: impl Into<RecordId>,
        snapshot: Record,
    ) -> Self {
        Self::new(entity_type, identifier, Operation::Modified, Some(snapshot))
    }

    pub fn deleted(entity_type: impl Into<EntityType>, identifier: impl Into<RecordId>) -> Self {
        Self::new(entity_type, identifier, Operation::Deleted, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_set_membership() {
        assert!(OperationSet::ADDITIONS.includes(Operation::Created));
        assert!(OperationSet::ADDITIONS.includes(Operation::Modified));
        assert!(!OperationSet::ADDITIONS.includes(Operation::Deleted));
        assert!(OperationSet::ANY.includes(Operation::Deleted));
        assert_eq!(OperationSet::default(), OperationSet::ANY);
    }

    #[test]
    fn test_operation_set_serde_rejects_unknown_bits() {
        let json = serde_json::to_string(&OperationSet::ADDITIONS).unwrap();
        assert_eq!(json, "3");
        assert!(serde_json::from_str::<OperationSet>("64").is_err());
    }

    #[test]
    fn test_mutation_event_from_json() {
        let event: MutationEvent = serde_json::from_value(json!({
            "entity_type": "article",
            "identifier": 42,
            "operation": "created",
            "snapshot": {"title": "hello"}
        }))
        .unwrap();
        assert_eq!(event.entity_type.as_str(), "article");
        assert_eq!(event.identifier, RecordId::Int(42));
        assert_eq!(event.operation, Operation::Created);
        assert!(event.snapshot.is_some());

        let deleted: MutationEvent = serde_json::from_value(json!({
            "entity_type": "article",
            "identifier": "abc",
            "operation": "deleted"
        }))
        .unwrap();
        assert!(deleted.snapshot.is_none());
    }
}
