//! Mutation recorder: turns inbound mutation events into recency entries.

use std::sync::Arc;

use recency_core::{MutationEvent, Operation, RecencyResult};

use crate::store::{RecencyStore, RecordOutcome};

/// What the recorder did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordDecision {
    /// An entry was written (possibly to no backend if all failed).
    Recorded(RecordOutcome),
    /// The policy does not cache this operation for the type.
    SkippedByPolicy,
    /// The snapshot is missing or matches none of `only_cache_matching`.
    SkippedNoMatch,
}

impl RecordDecision {
    pub fn is_recorded(&self) -> bool {
        matches!(self, RecordDecision::Recorded(_))
    }
}

/// Applies caching policy to mutation events.
///
/// Deletions are always recorded, with the deletion window as TTL. Creations
/// and modifications are recorded only when the policy enables them and the
/// snapshot passes the type's match predicates. Delivering an event twice
/// rewrites the same key and is harmless.
#[derive(Debug, Clone)]
pub struct MutationRecorder {
    store: Arc<RecencyStore>,
}

impl MutationRecorder {
    pub fn new(store: Arc<RecencyStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<RecencyStore> {
        &self.store
    }

    /// Record an event if the resolved policy allows it.
    pub async fn on_mutation(&self, event: MutationEvent) -> RecencyResult<RecordDecision> {
        let MutationEvent {
            entity_type,
            identifier,
            operation,
            snapshot,
        } = event;
        let policy = self.store.policy(&entity_type);

        if !policy.records(operation) {
            tracing::debug!(
                entity_type = %entity_type,
                identifier = %identifier,
                operation = %operation,
                "Operation not cached for this type, skipping"
            );
            return Ok(RecordDecision::SkippedByPolicy);
        }

        if operation != Operation::Deleted && !policy.matches(snapshot.as_ref()) {
            tracing::debug!(
                entity_type = %entity_type,
                identifier = %identifier,
                operation = %operation,
                has_snapshot = snapshot.is_some(),
                "Snapshot matches no cache predicate, skipping"
            );
            return Ok(RecordDecision::SkippedNoMatch);
        }

        let ttl = policy.ttl_for(operation);
        let outcome = self
            .store
            .record(&entity_type, identifier, operation, snapshot, ttl)
            .await?;
        Ok(RecordDecision::Recorded(outcome))
    }
}
