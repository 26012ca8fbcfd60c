//! In-memory [`ModelStore`], backing every unit test in this crate and
//! suitable for embedding ARIA in a single process without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::model::{Execution, InvalidTransition, Node, Plugin, Relationship, Service, Task};

use super::store::{ModelStore, StoreError};

#[derive(Default)]
pub struct InMemoryModelStore {
    nodes: RwLock<HashMap<Uuid, Node>>,
    relationships: RwLock<HashMap<Uuid, Relationship>>,
    executions: RwLock<HashMap<Uuid, Execution>>,
    tasks: RwLock<HashMap<Uuid, Task>>,
    plugins: RwLock<HashMap<Uuid, Plugin>>,
    services: RwLock<HashMap<Uuid, Service>>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Checks `incoming.version` against the stored row's version, then writes
/// `incoming` with its version bumped by one. Shared by every entity's
/// `update_*` method.
fn update_in_place<T: Clone>(
    map: &RwLock<HashMap<Uuid, T>>,
    id: Uuid,
    incoming_version: i64,
    mut incoming: T,
    version_of: impl Fn(&T) -> i64,
    set_version: impl Fn(&mut T, i64),
) -> Result<T, StoreError> {
    let mut guard = map.write();
    let current = guard.get(&id).ok_or(StoreError::NotFound(id))?;
    let current_version = version_of(current);
    if current_version != incoming_version {
        return Err(StoreError::VersionConflict {
            id,
            expected: incoming_version,
            found: current_version,
        });
    }
    set_version(&mut incoming, current_version + 1);
    guard.insert(id, incoming.clone());
    Ok(incoming)
}

#[async_trait]
impl ModelStore for InMemoryModelStore {
    async fn get_node(&self, id: Uuid) -> Result<Node, StoreError> {
        self.nodes.read().get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn put_node(&self, mut node: Node) -> Result<Node, StoreError> {
        node.version = 0;
        self.nodes.write().insert(node.id, node.clone());
        Ok(node)
    }

    async fn update_node(&self, node: Node) -> Result<Node, StoreError> {
        let id = node.id;
        let expected = node.version;
        update_in_place(
            &self.nodes,
            id,
            expected,
            node,
            |n| n.version,
            |n, v| n.version = v,
        )
    }

    async fn list_nodes(&self, service_id: Uuid) -> Result<Vec<Node>, StoreError> {
        Ok(self
            .nodes
            .read()
            .values()
            .filter(|n| n.service_id == service_id)
            .cloned()
            .collect())
    }

    async fn get_relationship(&self, id: Uuid) -> Result<Relationship, StoreError> {
        self.relationships
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn put_relationship(&self, mut relationship: Relationship) -> Result<Relationship, StoreError> {
        relationship.version = 0;
        self.relationships
            .write()
            .insert(relationship.id, relationship.clone());
        Ok(relationship)
    }

    async fn update_relationship(&self, relationship: Relationship) -> Result<Relationship, StoreError> {
        let id = relationship.id;
        let expected = relationship.version;
        update_in_place(
            &self.relationships,
            id,
            expected,
            relationship,
            |r| r.version,
            |r, v| r.version = v,
        )
    }

    async fn list_relationships(&self, service_id: Uuid) -> Result<Vec<Relationship>, StoreError> {
        Ok(self
            .relationships
            .read()
            .values()
            .filter(|r| r.service_id == service_id)
            .cloned()
            .collect())
    }

    async fn get_execution(&self, id: Uuid) -> Result<Execution, StoreError> {
        self.executions
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn put_execution(&self, mut execution: Execution) -> Result<Execution, StoreError> {
        execution.version = 0;
        self.executions.write().insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn update_execution(&self, execution: Execution) -> Result<Execution, StoreError> {
        let id = execution.id;
        let expected = execution.version;
        {
            let guard = self.executions.read();
            let current = guard.get(&id).ok_or(StoreError::NotFound(id))?;
            if current.status != execution.status && !current.status.can_transition_to(execution.status) {
                return Err(StoreError::IllegalTransition(InvalidTransition {
                    from: current.status,
                    to: execution.status,
                }));
            }
        }
        update_in_place(
            &self.executions,
            id,
            expected,
            execution,
            |e| e.version,
            |e, v| e.version = v,
        )
    }

    async fn list_active_executions(&self, service_id: Uuid) -> Result<Vec<Execution>, StoreError> {
        Ok(self
            .executions
            .read()
            .values()
            .filter(|e| e.service_id == service_id && e.status.is_active())
            .cloned()
            .collect())
    }

    async fn get_task(&self, id: Uuid) -> Result<Task, StoreError> {
        self.tasks.read().get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn put_task(&self, mut task: Task) -> Result<Task, StoreError> {
        task.version = 0;
        self.tasks.write().insert(task.id, task.clone());
        Ok(task)
    }

    async fn update_task(&self, task: Task) -> Result<Task, StoreError> {
        let id = task.id;
        let expected = task.version;
        update_in_place(
            &self.tasks,
            id,
            expected,
            task,
            |t| t.version,
            |t, v| t.version = v,
        )
    }

    async fn list_tasks(&self, execution_id: Uuid) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .tasks
            .read()
            .values()
            .filter(|t| t.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn get_plugin(&self, id: Uuid) -> Result<Plugin, StoreError> {
        self.plugins.read().get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn put_plugin(&self, plugin: Plugin) -> Result<Plugin, StoreError> {
        self.plugins.write().insert(plugin.id, plugin.clone());
        Ok(plugin)
    }

    async fn list_plugins(&self) -> Result<Vec<Plugin>, StoreError> {
        Ok(self.plugins.read().values().cloned().collect())
    }

    async fn get_service(&self, id: Uuid) -> Result<Service, StoreError> {
        self.services.read().get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn put_service(&self, mut service: Service) -> Result<Service, StoreError> {
        service.version = 0;
        self.services.write().insert(service.id, service.clone());
        Ok(service)
    }

    async fn update_service(&self, service: Service) -> Result<Service, StoreError> {
        let id = service.id;
        let expected = service.version;
        update_in_place(
            &self.services,
            id,
            expected,
            service,
            |s| s.version,
            |s, v| s.version = v,
        )
    }

    async fn get_service_by_name(&self, name: &str) -> Result<Option<Service>, StoreError> {
        Ok(self.services.read().values().find(|s| s.name == name).cloned())
    }

    async fn list_services(&self) -> Result<Vec<Service>, StoreError> {
        Ok(self.services.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionStatus, NodeState};
    use chrono::Utc;

    fn sample_node(service_id: Uuid) -> Node {
        Node {
            id: Uuid::now_v7(),
            service_id,
            node_type: "Compute".into(),
            state: NodeState::Initial,
            interfaces: Default::default(),
            attributes: Default::default(),
            host_id: None,
            version: 0,
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryModelStore::new();
        let node = sample_node(Uuid::now_v7());
        let put = store.put_node(node.clone()).await.unwrap();
        let fetched = store.get_node(put.id).await.unwrap();
        assert_eq!(fetched.id, node.id);
        assert_eq!(fetched.version, 0);
    }

    #[tokio::test]
    async fn update_with_stale_version_conflicts() {
        let store = InMemoryModelStore::new();
        let node = store.put_node(sample_node(Uuid::now_v7())).await.unwrap();

        let mut first_write = node.clone();
        first_write.state = NodeState::Creating;
        store.update_node(first_write).await.unwrap();

        let mut stale_write = node;
        stale_write.state = NodeState::Created;
        let err = store.update_node(stale_write).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn at_most_one_active_execution_per_service() {
        let store = InMemoryModelStore::new();
        let service_id = Uuid::now_v7();
        let execution = Execution {
            id: Uuid::now_v7(),
            service_id,
            workflow_name: "install".into(),
            status: ExecutionStatus::Started,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            ended_at: None,
            inputs: serde_json::json!({}),
            error: None,
            version: 0,
        };
        store.put_execution(execution).await.unwrap();
        let active = store.list_active_executions(service_id).await.unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn update_execution_rejects_an_illegal_transition() {
        let store = InMemoryModelStore::new();
        let execution = store
            .put_execution(Execution {
                id: Uuid::now_v7(),
                service_id: Uuid::now_v7(),
                workflow_name: "install".into(),
                status: ExecutionStatus::Pending,
                created_at: Utc::now(),
                started_at: None,
                ended_at: None,
                inputs: serde_json::json!({}),
                error: None,
                version: 0,
            })
            .await
            .unwrap();

        let mut illegal = execution.clone();
        illegal.status = ExecutionStatus::Succeeded;
        let err = store.update_execution(illegal).await.unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition(_)));
    }

    #[tokio::test]
    async fn service_round_trips_by_id_and_name() {
        let store = InMemoryModelStore::new();
        let service = store
            .put_service(crate::model::Service {
                id: Uuid::now_v7(),
                name: "webapp".into(),
                workflows: Default::default(),
                version: 0,
            })
            .await
            .unwrap();

        assert_eq!(store.get_service(service.id).await.unwrap().name, "webapp");
        assert_eq!(
            store.get_service_by_name("webapp").await.unwrap().map(|s| s.id),
            Some(service.id)
        );
        assert!(store.get_service_by_name("missing").await.unwrap().is_none());
    }
}
