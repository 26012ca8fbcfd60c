use uuid::Uuid;

/// Errors an [`super::Executor`] can surface. Most failures during an
/// operation's actual run become a `task.failure` signal rather than this
/// type — `ExecutorError` is reserved for dispatch-time problems (unknown
/// function, dead executor, failed spawn) the engine must see before it can
/// even hand the task off (§4.6).
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("no operation registered for function: {0}")]
    OperationNotFound(String),

    #[error("task {0} has no function to dispatch")]
    MissingFunction(Uuid),

    #[error("subprocess spawn or I/O failure: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("subprocess wire protocol error: {0}")]
    Wire(String),

    #[error(transparent)]
    Context(#[from] crate::context::ContextError),

    #[error(transparent)]
    Timeout(#[from] crate::reliability::TimeoutError),
}
