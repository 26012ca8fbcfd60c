//! Tracked changes: the recorded read-modify-write diffs that flow from an
//! operation (in-process or subprocess) back into the model store.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which table a [`TrackedChange`] targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Node,
    Relationship,
    Execution,
    Task,
}

/// A single attribute mutation, keyed by `(entity_kind, id, attribute)`
/// exactly as spec'd. The subprocess runner accumulates these during an
/// operation and ships them home in the `succeeded`/`failed` wire message;
/// the listener applies each one through [`crate::persistence::ModelStore`]
/// with the same optimistic protocol used by in-process writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackedChange {
    pub entity_kind: EntityKind,
    pub entity_id: Uuid,
    pub attribute: String,
    pub old: Option<serde_json::Value>,
    pub new: serde_json::Value,
}

impl TrackedChange {
    pub fn new(
        entity_kind: EntityKind,
        entity_id: Uuid,
        attribute: impl Into<String>,
        old: Option<serde_json::Value>,
        new: serde_json::Value,
    ) -> Self {
        Self {
            entity_kind,
            entity_id,
            attribute: attribute.into(),
            old,
            new,
        }
    }
}
