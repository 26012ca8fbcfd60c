//! The event bus coupling engine and executor transitions to persistence
//! and node-state updates (§4.1, §4.4).

mod bus;
mod handlers;

pub use bus::{EventBus, Handler, Signal, SignalKind, TaskFailureKind};
pub use handlers::{register_task_handlers, register_workflow_handlers};
