//! In-process executor (§4.7). Grounded on the source's `WorkerPool`
//! (`worker/pool.rs`) — a registered-handler map plus a semaphore-bounded
//! concurrency limit — collapsed to a single executor since the engine
//! itself now does the scheduling the pool's poll loop used to do; there is
//! no separate claim/heartbeat/reclaim cycle to run in-process.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::context::{OperationContext, OperationError};
use crate::events::{EventBus, Signal, TaskFailureKind};
use crate::model::Task;

use super::error::ExecutorError;
use super::registry::OperationRegistry;
use super::Executor;

/// Runs operation functions in-process, bounded by `max_concurrency`
/// simultaneous tasks.
pub struct ThreadExecutor {
    registry: OperationRegistry,
    semaphore: Arc<Semaphore>,
}

impl ThreadExecutor {
    pub fn new(registry: OperationRegistry, max_concurrency: usize) -> Self {
        Self {
            registry,
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }
}

#[async_trait]
impl Executor for ThreadExecutor {
    async fn execute(&self, task: Task, ctx: Arc<OperationContext>, bus: EventBus) -> Result<(), ExecutorError> {
        let function = task.function.clone().ok_or(ExecutorError::MissingFunction(task.id))?;
        let handler = self
            .registry
            .get(&function)
            .ok_or_else(|| ExecutorError::OperationNotFound(function.clone()))?;
        let arguments = task.arguments.clone();
        let task_id = task.id;
        let semaphore = self.semaphore.clone();

        tokio::spawn(async move {
            let Ok(permit) = semaphore.acquire_owned().await else {
                return;
            };
            bus.emit(Signal::TaskStart { task_id }).await;
            match handler(ctx, arguments).await {
                Ok(_value) => {
                    bus.emit(Signal::TaskSuccess { task_id }).await;
                }
                Err(err) => {
                    bus.emit(Signal::TaskFailure { task_id, exception: to_failure_kind(err) }).await;
                }
            }
            drop(permit);
        });

        Ok(())
    }

    async fn terminate(&self, _task_id: Uuid) -> Result<(), ExecutorError> {
        // An in-process operation runs to completion once spawned; there's
        // no cooperative cancellation point inside a plain async function.
        Ok(())
    }

    async fn close(&self) -> Result<(), ExecutorError> {
        Ok(())
    }
}

fn to_failure_kind(err: OperationError) -> TaskFailureKind {
    match err {
        OperationError::Abort(message) => TaskFailureKind::Abort { message },
        OperationError::Retry { message, interval } => TaskFailureKind::Error { message, retry_interval: interval },
        other => TaskFailureKind::Error { message: other.to_string(), retry_interval: None },
    }
}
