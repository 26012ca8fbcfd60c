//! Node lifecycle state and the interface/operation shapes attached to
//! nodes and relationships.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// TOSCA node lifecycle state. Transitions are driven by task state handlers
/// (see [`crate::events::handlers`]), never set directly by operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Initial,
    Creating,
    Created,
    Configuring,
    Configured,
    Starting,
    Started,
    Stopping,
    Stopped,
    Deleting,
    Deleted,
    Error,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initial => "initial",
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Configuring => "configuring",
            Self::Configured => "configured",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Whether a task acts on the relationship's source or target node, or (for
/// node-bound tasks) the node itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunsOn {
    Node,
    Source,
    Target,
}

/// A bundle of named operations exposed by a node or relationship.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Interface {
    #[serde(default)]
    pub operations: HashMap<String, Operation>,
}

/// A single operation: the dispatch target plus the inputs it declares and
/// accepts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operation {
    /// Fully-qualified dispatch name, resolved through
    /// [`crate::executor::OperationRegistry`].
    pub function: String,
    /// Script/entry-point identifier the function ultimately invokes.
    pub implementation: Option<String>,
    pub plugin_id: Option<Uuid>,
    #[serde(default)]
    pub inputs: HashMap<String, serde_json::Value>,
}

/// The interface name under which the TOSCA standard lifecycle operations
/// are declared. Tasks built from it carry the actual lifecycle verb in
/// `operation_name`, not `interface_name` (§4.4).
pub const STANDARD_INTERFACE: &str = "Standard";

/// The TOSCA standard lifecycle. Operations whose interface name matches one
/// of these also drive [`NodeState`] (§4.4 node state update table).
pub const STANDARD_LIFECYCLE: &[&str] = &["create", "configure", "start", "stop", "delete"];

/// The `(transitional, final)` node states for a standard lifecycle
/// operation, or `None` if `interface_name` is not one of the standard
/// lifecycle operations.
pub fn lifecycle_states(interface_name: &str) -> Option<(NodeState, NodeState)> {
    match interface_name {
        "create" => Some((NodeState::Creating, NodeState::Created)),
        "configure" => Some((NodeState::Configuring, NodeState::Configured)),
        "start" => Some((NodeState::Starting, NodeState::Started)),
        "stop" => Some((NodeState::Stopping, NodeState::Stopped)),
        "delete" => Some((NodeState::Deleting, NodeState::Deleted)),
        _ => None,
    }
}
