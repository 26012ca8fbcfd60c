use uuid::Uuid;

use crate::executor::ExecutorError;
use crate::model::ExecutorKind;
use crate::persistence::StoreError;

/// Errors from driving one execution's scheduling loop (§4.5).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// A real (non-stub) task was ready to dispatch but carries no
    /// `executor_kind` — violates the graph compiler's invariant that every
    /// operation task records one.
    #[error("task {0} has no executor_kind recorded")]
    MissingExecutorKind(Uuid),

    /// A task named an `executor_kind` the engine was never configured with
    /// via [`super::WorkflowEngine::with_executor`].
    #[error("no executor registered for {0:?}")]
    UnregisteredExecutor(ExecutorKind),
}
