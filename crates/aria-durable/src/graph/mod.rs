//! The API task graph: the in-memory DAG a workflow function builds (§4.2).
//!
//! Nothing here is persisted — [`ApiGraph`] is pure staging. The graph
//! compiler ([`crate::compiler`]) is the only thing that turns it into
//! [`crate::model::Task`] rows.

mod api_graph;
mod error;

pub use api_graph::{ApiGraph, ApiTaskId, ApiTaskNode, OperationTask, StubTask, TaskRef, WorkflowTask};
pub use error::GraphError;
