//! `EventBus`: a plain value owned by whoever drives the engine, not a
//! process-wide static. Subscribers are closures keyed by a [`Signal`]'s
//! [`SignalKind`] rather than a string-named lookup, so dispatch stays
//! exhaustive-checked at the call site that builds it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use uuid::Uuid;

/// The reason an operation reported `task.failure`.
#[derive(Debug, Clone)]
pub enum TaskFailureKind {
    /// `ctx.task.abort(message)` — terminal, no retry regardless of
    /// `max_attempts`.
    Abort { message: String },
    /// `ctx.task.retry(message, interval)` or any other raised error —
    /// subject to the same retry-vs-fail decision either way (§4.4).
    Error {
        message: String,
        retry_interval: Option<Duration>,
    },
}

impl TaskFailureKind {
    pub fn message(&self) -> &str {
        match self {
            Self::Abort { message } => message,
            Self::Error { message, .. } => message,
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Abort { .. })
    }
}

/// Task and workflow transition signals (§4.1).
#[derive(Debug, Clone)]
pub enum Signal {
    TaskSent { task_id: Uuid },
    TaskStart { task_id: Uuid },
    TaskSuccess { task_id: Uuid },
    TaskFailure { task_id: Uuid, exception: TaskFailureKind },
    WorkflowStart { execution_id: Uuid },
    WorkflowSuccess { execution_id: Uuid },
    WorkflowFailure { execution_id: Uuid, message: String },
    WorkflowCancelling { execution_id: Uuid },
    WorkflowCancelled { execution_id: Uuid },
    WorkflowResume { execution_id: Uuid },
}

/// The dispatch key for a [`Signal`], used to index subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    TaskSent,
    TaskStart,
    TaskSuccess,
    TaskFailure,
    WorkflowStart,
    WorkflowSuccess,
    WorkflowFailure,
    WorkflowCancelling,
    WorkflowCancelled,
    WorkflowResume,
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::TaskSent { .. } => SignalKind::TaskSent,
            Self::TaskStart { .. } => SignalKind::TaskStart,
            Self::TaskSuccess { .. } => SignalKind::TaskSuccess,
            Self::TaskFailure { .. } => SignalKind::TaskFailure,
            Self::WorkflowStart { .. } => SignalKind::WorkflowStart,
            Self::WorkflowSuccess { .. } => SignalKind::WorkflowSuccess,
            Self::WorkflowFailure { .. } => SignalKind::WorkflowFailure,
            Self::WorkflowCancelling { .. } => SignalKind::WorkflowCancelling,
            Self::WorkflowCancelled { .. } => SignalKind::WorkflowCancelled,
            Self::WorkflowResume { .. } => SignalKind::WorkflowResume,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TaskSent => "task.sent",
            Self::TaskStart => "task.start",
            Self::TaskSuccess => "task.success",
            Self::TaskFailure => "task.failure",
            Self::WorkflowStart => "workflow.start",
            Self::WorkflowSuccess => "workflow.success",
            Self::WorkflowFailure => "workflow.failure",
            Self::WorkflowCancelling => "workflow.cancelling",
            Self::WorkflowCancelled => "workflow.cancelled",
            Self::WorkflowResume => "workflow.resume",
        };
        write!(f, "{s}")
    }
}

/// A subscriber: takes the emitted signal by value, returns whether it
/// succeeded. A subscriber error is logged and does not stop the others.
pub type Handler = Arc<dyn Fn(Signal) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Process-local publish/subscribe registry. Dispatch to all subscribers of
/// a signal's kind happens sequentially on the emitting task; a failing
/// subscriber is logged via `tracing::error!` and does not stop the rest.
#[derive(Default, Clone)]
pub struct EventBus {
    subscribers: HashMap<SignalKind, Vec<Handler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, kind: SignalKind, handler: Handler) {
        self.subscribers.entry(kind).or_default().push(handler);
    }

    #[tracing::instrument(skip(self, signal), fields(signal = %signal.kind()))]
    pub async fn emit(&self, signal: Signal) {
        let kind = signal.kind();
        let Some(handlers) = self.subscribers.get(&kind) else {
            return;
        };
        for handler in handlers {
            if let Err(err) = handler(signal.clone()).await {
                tracing::error!(signal = %kind, error = %err, "event subscriber failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn dispatches_to_all_subscribers_of_the_matching_kind() {
        let mut bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            bus.subscribe(
                SignalKind::TaskStart,
                Arc::new(move |_signal| {
                    let calls = calls.clone();
                    Box::pin(async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                }),
            );
        }

        bus.emit(Signal::TaskStart {
            task_id: Uuid::now_v7(),
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn a_failing_subscriber_does_not_stop_the_others() {
        let mut bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        bus.subscribe(
            SignalKind::TaskSuccess,
            Arc::new(|_signal| Box::pin(async { Err(anyhow::anyhow!("boom")) })),
        );
        let calls_clone = calls.clone();
        bus.subscribe(
            SignalKind::TaskSuccess,
            Arc::new(move |_signal| {
                let calls = calls_clone.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );

        bus.emit(Signal::TaskSuccess {
            task_id: Uuid::now_v7(),
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
