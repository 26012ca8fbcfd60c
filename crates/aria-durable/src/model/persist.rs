//! `persist_changes`: the read-modify-write-with-retry scope every task
//! and workflow state handler runs its writes through (§4.4).

use std::future::Future;
use std::pin::Pin;

use uuid::Uuid;

use crate::persistence::{ModelStore, StoreError};
use crate::reliability::RetryPolicy;

use super::{Execution, Node, Task};

/// An entity `persist_changes` knows how to re-fetch and save through a
/// [`ModelStore`].
pub trait Persisted: Sized {
    fn fetch<'a>(
        store: &'a dyn ModelStore,
        id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Self, StoreError>> + Send + 'a>>;

    fn save<'a>(
        store: &'a dyn ModelStore,
        entity: Self,
    ) -> Pin<Box<dyn Future<Output = Result<Self, StoreError>> + Send + 'a>>;
}

impl Persisted for Node {
    fn fetch<'a>(
        store: &'a dyn ModelStore,
        id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Self, StoreError>> + Send + 'a>> {
        Box::pin(store.get_node(id))
    }

    fn save<'a>(
        store: &'a dyn ModelStore,
        entity: Self,
    ) -> Pin<Box<dyn Future<Output = Result<Self, StoreError>> + Send + 'a>> {
        Box::pin(store.update_node(entity))
    }
}

impl Persisted for Task {
    fn fetch<'a>(
        store: &'a dyn ModelStore,
        id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Self, StoreError>> + Send + 'a>> {
        Box::pin(store.get_task(id))
    }

    fn save<'a>(
        store: &'a dyn ModelStore,
        entity: Self,
    ) -> Pin<Box<dyn Future<Output = Result<Self, StoreError>> + Send + 'a>> {
        Box::pin(store.update_task(entity))
    }
}

impl Persisted for Execution {
    fn fetch<'a>(
        store: &'a dyn ModelStore,
        id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Self, StoreError>> + Send + 'a>> {
        Box::pin(store.get_execution(id))
    }

    fn save<'a>(
        store: &'a dyn ModelStore,
        entity: Self,
    ) -> Pin<Box<dyn Future<Output = Result<Self, StoreError>> + Send + 'a>> {
        Box::pin(store.update_execution(entity))
    }
}

/// Re-fetch `id`, apply `mutate`, and save, retrying on
/// `StoreError::VersionConflict` with `retry`'s backoff. Any other store
/// error is returned immediately.
pub async fn persist_changes<E: Persisted>(
    store: &dyn ModelStore,
    id: Uuid,
    retry: &RetryPolicy,
    mut mutate: impl FnMut(&mut E),
) -> Result<E, StoreError> {
    let mut attempt = 1;
    loop {
        let mut entity = E::fetch(store, id).await?;
        mutate(&mut entity);
        match E::save(store, entity).await {
            Ok(saved) => return Ok(saved),
            Err(StoreError::VersionConflict { .. }) if retry.has_attempts_remaining(attempt) => {
                tokio::time::sleep(retry.delay_for_attempt(attempt + 1)).await;
                attempt += 1;
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeState;
    use crate::persistence::InMemoryModelStore;

    #[tokio::test]
    async fn persist_changes_applies_mutation_once() {
        let store = InMemoryModelStore::new();
        let node = store
            .put_node(Node {
                id: Uuid::now_v7(),
                service_id: Uuid::now_v7(),
                node_type: "Compute".into(),
                state: NodeState::Initial,
                interfaces: Default::default(),
                attributes: Default::default(),
                host_id: None,
                version: 0,
            })
            .await
            .unwrap();

        let retry = RetryPolicy::fixed(std::time::Duration::from_millis(1), 3);
        let updated: Node = persist_changes(&store, node.id, &retry, |n| {
            n.state = NodeState::Created;
        })
        .await
        .unwrap();

        assert_eq!(updated.state, NodeState::Created);
        assert_eq!(updated.version, 1);
    }
}
