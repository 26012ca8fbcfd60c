use std::time::Duration;

use crate::persistence::StoreError;

/// An operation function's `Result` error type (§4.9, §6). Rust has no
/// exceptions, so the distinguished `AbortException`/retry-with-interval
/// cases the runner would otherwise catch become ordinary enum variants —
/// an operation returns `Err(ctx.task().abort("..."))` instead of raising.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    /// `ctx.task.abort(message)` — terminal, never retried.
    #[error("operation aborted: {0}")]
    Abort(String),

    /// `ctx.task.retry(message, interval)` — retried subject to the same
    /// attempts-remaining check as any other failure (§4.4).
    #[error("operation requested retry: {message}")]
    Retry {
        message: String,
        interval: Option<Duration>,
    },

    #[error("model store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the context layer itself (proxy binding, resource access),
/// distinct from [`OperationError`] which an operation function returns.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("failed to bind ctx proxy socket: {0}")]
    Bind(#[source] std::io::Error),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// A second `abort`/`retry` call on the same task through the proxy
    /// (§4.9: "at most once per task").
    #[error("illegal ctx operation: abort/retry already called for this task")]
    IllegalCtxOperation,
}
