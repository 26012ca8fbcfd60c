use super::api_graph::ApiTaskId;

/// Errors raised while building an [`super::ApiGraph`]. Per REDESIGN FLAGS,
/// these are ordinary `Result`s rather than the panicking
/// `TaskNotInGraphError` the source raises — a workflow function is
/// expected to handle a bad reference the same way it handles any other
/// programmer error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    /// `add_dependency`/`remove_dependency`/`sequence` referenced a task id
    /// that was never added to the graph (source: `TaskNotInGraphError`).
    #[error("task {0} is not in the graph")]
    UnknownTask(ApiTaskId),

    /// `topological_order` found a cycle — the API graph builder never
    /// produces one through `add_dependency`/`sequence` alone, but a
    /// pathological `remove_dependency` sequence or a hand-built graph
    /// could.
    #[error("dependency cycle detected in API graph")]
    Cycle,
}
