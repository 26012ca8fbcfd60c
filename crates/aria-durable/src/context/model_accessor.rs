//! `ctx.model`: typed get/put/update/refresh/list accessors over the shared
//! store (§4.9). Each accessor is a thin wrapper — the real contract lives
//! on [`crate::persistence::ModelStore`]; this just scopes it per entity
//! kind the way the operation author expects to spell it (`ctx.model.node()`
//! rather than a single untyped accessor).

use std::sync::Arc;

use uuid::Uuid;

use crate::model::{Execution, Node, Relationship, Task};
use crate::persistence::{ModelStore, StoreError};

#[derive(Clone)]
pub struct ModelAccessor {
    store: Arc<dyn ModelStore>,
}

impl ModelAccessor {
    pub fn new(store: Arc<dyn ModelStore>) -> Self {
        Self { store }
    }

    pub fn node(&self) -> NodeAccessor {
        NodeAccessor { store: self.store.clone() }
    }

    pub fn relationship(&self) -> RelationshipAccessor {
        RelationshipAccessor { store: self.store.clone() }
    }

    pub fn task(&self) -> TaskAccessor {
        TaskAccessor { store: self.store.clone() }
    }

    pub fn execution(&self) -> ExecutionAccessor {
        ExecutionAccessor { store: self.store.clone() }
    }
}

macro_rules! accessor {
    ($name:ident, $entity:ty, $get:ident, $put:ident, $update:ident, $refresh:ident) => {
        pub struct $name {
            store: Arc<dyn ModelStore>,
        }

        impl $name {
            pub async fn get(&self, id: Uuid) -> Result<$entity, StoreError> {
                self.store.$get(id).await
            }

            pub async fn put(&self, entity: $entity) -> Result<$entity, StoreError> {
                self.store.$put(entity).await
            }

            pub async fn update(&self, entity: $entity) -> Result<$entity, StoreError> {
                self.store.$update(entity).await
            }

            pub async fn refresh(&self, id: Uuid) -> Result<$entity, StoreError> {
                self.store.$refresh(id).await
            }
        }
    };
}

accessor!(NodeAccessor, Node, get_node, put_node, update_node, refresh_node);
accessor!(ExecutionAccessor, Execution, get_execution, put_execution, update_execution, refresh_execution);
accessor!(TaskAccessor, Task, get_task, put_task, update_task, refresh_task);

impl NodeAccessor {
    pub async fn list(&self, service_id: Uuid) -> Result<Vec<Node>, StoreError> {
        self.store.list_nodes(service_id).await
    }
}

impl TaskAccessor {
    pub async fn list(&self, execution_id: Uuid) -> Result<Vec<Task>, StoreError> {
        self.store.list_tasks(execution_id).await
    }
}

pub struct RelationshipAccessor {
    store: Arc<dyn ModelStore>,
}

impl RelationshipAccessor {
    pub async fn get(&self, id: Uuid) -> Result<Relationship, StoreError> {
        self.store.get_relationship(id).await
    }

    pub async fn put(&self, entity: Relationship) -> Result<Relationship, StoreError> {
        self.store.put_relationship(entity).await
    }

    pub async fn update(&self, entity: Relationship) -> Result<Relationship, StoreError> {
        self.store.update_relationship(entity).await
    }

    pub async fn list(&self, service_id: Uuid) -> Result<Vec<Relationship>, StoreError> {
        self.store.list_relationships(service_id).await
    }
}
