//! # aria-durable
//!
//! A durable, DAG-based workflow execution core: callers build an
//! [`graph::ApiGraph`] (directly, or via [`prepare::ExecutionPreparer`] and
//! one of the built-in TOSCA lifecycle workflows), the
//! [`compiler::GraphCompiler`] lowers it into persisted [`model::Task`]
//! rows, and [`engine::WorkflowEngine`] schedules those rows against
//! pluggable [`executor::Executor`] implementations until the execution
//! reaches an end state.
//!
//! ## Layout
//!
//! - [`model`] — entity shapes (`Node`, `Relationship`, `Execution`, `Task`,
//!   `Plugin`, `Service`), status enums and their transition tables.
//! - [`persistence`] — the [`persistence::ModelStore`] contract plus an
//!   in-memory implementation and an optional Postgres-backed one.
//! - [`graph`] — the in-memory [`graph::ApiGraph`] a workflow function
//!   builds.
//! - [`compiler`] — lowers an `ApiGraph` into persisted `Task` rows.
//! - [`prepare`] — turns `(service, workflow, inputs)` into a compiled,
//!   runnable execution; ships the built-in `install`/`uninstall`/`start`/
//!   `stop` workflows.
//! - [`engine`] — the scheduling loop that dispatches ready tasks.
//! - [`executor`] — task dispatch: in-process threads or a subprocess over
//!   a length-prefixed TCP wire protocol.
//! - [`events`] — the bus coupling engine/executor signals to persisted
//!   state transitions.
//! - [`context`] — the `ctx` object operations use to read the model and
//!   claim shared resources, and its HTTP surface for external scripts.
//! - [`reliability`] — retry, circuit breaker, and timeout primitives
//!   shared across the persistence and executor layers.

pub mod compiler;
pub mod context;
pub mod engine;
pub mod events;
pub mod executor;
pub mod graph;
pub mod model;
pub mod persistence;
pub mod prepare;
pub mod reliability;

/// Re-exports of the types most callers need to start a workflow engine.
pub mod prelude {
    pub use crate::compiler::{CompiledGraph, CompileError, GraphCompiler};
    pub use crate::context::{ContextError, OperationContext, OperationError};
    pub use crate::engine::{EngineConfig, EngineError, WorkflowEngine};
    pub use crate::events::{EventBus, Signal, SignalKind};
    pub use crate::executor::{Executor, ExecutorError, OperationRegistry, ThreadExecutor};
    pub use crate::graph::{ApiGraph, OperationTask, TaskRef};
    pub use crate::model::{Execution, ExecutionStatus, Node, Relationship, Service, Task, TaskStatus};
    pub use crate::persistence::{InMemoryModelStore, ModelStore, StoreError};
    pub use crate::prepare::{ExecutionPreparer, PreparedExecution, WorkflowRegistry};
}
