//! `ctx`: the object an operation function receives (§4.9).

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::model::{Node, Relationship, RunsOn};
use crate::persistence::{ModelStore, StoreError};

use super::error::OperationError;
use super::model_accessor::ModelAccessor;
use super::resource::{ResourceAccessor, ResourceStore};

/// `ctx.task`: the current task's abort/retry affordances. Operations call
/// these to *construct* the error they return — Rust has no exception to
/// raise, so `Err(ctx.task().abort("message"))` is the idiom that replaces
/// `ctx.task.abort(message)` raising `AbortException` in the source.
#[derive(Debug, Clone, Copy)]
pub struct TaskHandle {
    pub task_id: Uuid,
}

impl TaskHandle {
    pub fn abort(&self, message: impl Into<String>) -> OperationError {
        OperationError::Abort(message.into())
    }

    pub fn retry(&self, message: impl Into<String>, interval: Option<Duration>) -> OperationError {
        OperationError::Retry {
            message: message.into(),
            interval,
        }
    }
}

/// The context passed to an operation function: task/actor identity, a
/// store handle, and accessors for the model and resource store (§4.9).
/// Holds only `Uuid`s plus an `Arc<dyn ModelStore>` — never a back-reference
/// to the engine — so it stays `Send + Sync + 'static` and cheap to clone
/// across a spawned task boundary.
#[derive(Clone)]
pub struct OperationContext {
    pub task_id: Uuid,
    pub execution_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub runs_on: RunsOn,
    store: Arc<dyn ModelStore>,
    resources: Arc<dyn ResourceStore>,
}

impl OperationContext {
    pub fn new(
        task_id: Uuid,
        execution_id: Uuid,
        actor_id: Option<Uuid>,
        runs_on: RunsOn,
        store: Arc<dyn ModelStore>,
        resources: Arc<dyn ResourceStore>,
    ) -> Self {
        Self {
            task_id,
            execution_id,
            actor_id,
            runs_on,
            store,
            resources,
        }
    }

    pub fn task(&self) -> TaskHandle {
        TaskHandle { task_id: self.task_id }
    }

    pub fn model(&self) -> ModelAccessor {
        ModelAccessor::new(self.store.clone())
    }

    /// The raw store handle. The subprocess executor needs this directly to
    /// apply a finished task's [`crate::model::TrackedChange`]s, which name
    /// an entity kind rather than going through a typed accessor.
    pub fn store_handle(&self) -> Arc<dyn ModelStore> {
        self.store.clone()
    }

    pub fn resource(&self) -> ResourceAccessor {
        ResourceAccessor::new(self.resources.clone())
    }

    /// `ctx.node` — the actor node, when `runs_on = node`.
    pub async fn node(&self) -> Result<Node, StoreError> {
        let id = self.actor_id.ok_or(StoreError::Backend("task has no node actor".into()))?;
        self.store.get_node(id).await
    }

    /// `ctx.relationship` — the actor relationship, when `runs_on` targets one.
    pub async fn relationship(&self) -> Result<Relationship, StoreError> {
        let id = self
            .actor_id
            .ok_or(StoreError::Backend("task has no relationship actor".into()))?;
        self.store.get_relationship(id).await
    }

    /// `ctx.logger` — operations log through `tracing`, scoped with the
    /// task and execution id, rather than a bespoke logger object.
    pub fn logger(&self) -> tracing::Span {
        tracing::info_span!("operation", task_id = %self.task_id, execution_id = %self.execution_id)
    }
}
