//! Entity shapes, status enums, transition tables, and tracked-change
//! semantics for the ARIA execution model.
//!
//! Every entity here carries a `version: i64` used for optimistic
//! concurrency against [`crate::persistence::ModelStore`]: a write supplies
//! the version it last read, and the store rejects it with
//! `StoreError::VersionConflict` if the row has moved on.

mod execution;
mod node;
mod persist;
mod plugin;
mod task;
mod tracked_change;

pub use execution::{Execution, ExecutionStatus, InvalidTransition};
pub use node::{lifecycle_states, Interface, NodeState, Operation, RunsOn, STANDARD_INTERFACE, STANDARD_LIFECYCLE};
pub use persist::{persist_changes, Persisted};
pub use plugin::Plugin;
pub use task::{ExecutorKind, StubType, Task, TaskStatus, INFINITE_RETRIES};
pub use tracked_change::{EntityKind, TrackedChange};

use uuid::Uuid;

/// A node instance within a service topology.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct Node {
    pub id: Uuid,
    pub service_id: Uuid,
    pub node_type: String,
    pub state: NodeState,
    #[serde(default)]
    pub interfaces: std::collections::HashMap<String, Interface>,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub host_id: Option<Uuid>,
    pub version: i64,
}

/// A directed edge between two nodes, usable as a task actor via `runs_on`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct Relationship {
    pub id: Uuid,
    pub service_id: Uuid,
    pub source_id: Uuid,
    pub target_id: Uuid,
    #[serde(default)]
    pub interfaces: std::collections::HashMap<String, Interface>,
    pub version: i64,
}

/// The root container: a deployed topology plus the executions run against it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    /// Declared workflow name → entry-point function, e.g. `"install" -> "workflows.install"`.
    #[serde(default)]
    pub workflows: std::collections::HashMap<String, String>,
    pub version: i64,
}
