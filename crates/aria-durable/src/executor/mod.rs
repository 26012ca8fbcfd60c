//! Task dispatch (§4.6): the [`Executor`] trait and its two implementations.
//!
//! An executor's `execute` returns as soon as the task is *accepted* for
//! execution, not once it finishes — the executor itself emits
//! `task.start`/`task.success`/`task.failure` onto the bus asynchronously as
//! the operation actually runs and completes. This lets the engine's poll
//! loop dispatch a task and move straight on to the next one regardless of
//! whether the work happens in a spawned tokio task ([`ThreadExecutor`]) or
//! a child process on the far end of a TCP connection
//! ([`SubprocessExecutor`]). Stub tasks (`task.stub_type.is_some()`) never
//! reach an executor at all; the engine completes those directly.

mod error;
mod registry;
mod subprocess;
mod thread;
mod wire;

pub use error::ExecutorError;
pub use registry::{OperationFn, OperationRegistry};
pub use subprocess::{SubprocessExecutor, ARIA_ARGUMENTS_VAR, ARIA_FUNCTION_VAR, ARIA_TASK_ID_VAR, ARIA_WIRE_ADDR_VAR};
pub use thread::ThreadExecutor;
pub use wire::{read_frame, write_frame, WireMessage};

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::context::OperationContext;
use crate::events::EventBus;
use crate::model::Task;

/// Dispatches a task and reports its outcome back through `bus`.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Accept `task` for execution. Returns once dispatch has started, not
    /// once the operation finishes; look for `task.start`/`task.success`/
    /// `task.failure` on `bus` for the outcome.
    async fn execute(&self, task: Task, ctx: Arc<OperationContext>, bus: EventBus) -> Result<(), ExecutorError>;

    /// Best-effort cancellation of an in-flight task. Not all executors can
    /// honor this precisely.
    async fn terminate(&self, task_id: Uuid) -> Result<(), ExecutorError>;

    /// Release any resources the executor is holding open (listener
    /// sockets, thread pools). Called once when the engine shuts down.
    async fn close(&self) -> Result<(), ExecutorError>;
}
