//! The `ModelStore` contract: the transactional, optimistically-versioned
//! entity store every other component treats as an external collaborator
//! (spec.md §1 lists it as "referenced only by contract"). This crate ships
//! an in-memory implementation for tests and embedding, plus an optional
//! Postgres-backed one.

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{Execution, InvalidTransition, Node, Plugin, Relationship, Service, Task};

/// Errors a [`ModelStore`] implementation can return.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("entity not found: {0}")]
    NotFound(Uuid),

    /// An optimistic write lost the race: the row's version has moved past
    /// what the caller last read. Retried internally by `persist_changes`
    /// (see [`crate::events::persist_changes`]).
    #[error("version conflict on {id}: expected {expected}, found {found}")]
    VersionConflict {
        id: Uuid,
        expected: i64,
        found: i64,
    },

    /// An `update_execution` call tried to move `status` outside the table
    /// in §3. Writes that leave `status` unchanged never hit this — only an
    /// attempted jump to a genuinely illegal next state does.
    #[error(transparent)]
    IllegalTransition(#[from] InvalidTransition),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Transactional get/put/update/refresh/list over the five entity kinds,
/// each write carrying the version the caller last observed.
#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn get_node(&self, id: Uuid) -> Result<Node, StoreError>;
    async fn put_node(&self, node: Node) -> Result<Node, StoreError>;
    async fn update_node(&self, node: Node) -> Result<Node, StoreError>;
    async fn refresh_node(&self, id: Uuid) -> Result<Node, StoreError> {
        self.get_node(id).await
    }
    async fn list_nodes(&self, service_id: Uuid) -> Result<Vec<Node>, StoreError>;

    async fn get_relationship(&self, id: Uuid) -> Result<Relationship, StoreError>;
    async fn put_relationship(&self, relationship: Relationship) -> Result<Relationship, StoreError>;
    async fn update_relationship(&self, relationship: Relationship) -> Result<Relationship, StoreError>;
    async fn list_relationships(&self, service_id: Uuid) -> Result<Vec<Relationship>, StoreError>;

    async fn get_execution(&self, id: Uuid) -> Result<Execution, StoreError>;
    async fn put_execution(&self, execution: Execution) -> Result<Execution, StoreError>;
    async fn update_execution(&self, execution: Execution) -> Result<Execution, StoreError>;
    async fn refresh_execution(&self, id: Uuid) -> Result<Execution, StoreError> {
        self.get_execution(id).await
    }
    async fn list_active_executions(&self, service_id: Uuid) -> Result<Vec<Execution>, StoreError>;

    async fn get_task(&self, id: Uuid) -> Result<Task, StoreError>;
    async fn put_task(&self, task: Task) -> Result<Task, StoreError>;
    async fn update_task(&self, task: Task) -> Result<Task, StoreError>;
    async fn refresh_task(&self, id: Uuid) -> Result<Task, StoreError> {
        self.get_task(id).await
    }
    async fn list_tasks(&self, execution_id: Uuid) -> Result<Vec<Task>, StoreError>;

    async fn get_plugin(&self, id: Uuid) -> Result<Plugin, StoreError>;
    async fn put_plugin(&self, plugin: Plugin) -> Result<Plugin, StoreError>;
    async fn list_plugins(&self) -> Result<Vec<Plugin>, StoreError>;

    async fn get_service(&self, id: Uuid) -> Result<Service, StoreError>;
    async fn put_service(&self, service: Service) -> Result<Service, StoreError>;
    async fn update_service(&self, service: Service) -> Result<Service, StoreError>;
    async fn get_service_by_name(&self, name: &str) -> Result<Option<Service>, StoreError>;
    async fn list_services(&self) -> Result<Vec<Service>, StoreError>;
}
