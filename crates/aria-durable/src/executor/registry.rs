//! `OperationRegistry`: fully-qualified function name -> handler (§4.6,
//! §4.7). Grounded on the shape of the source's `WorkflowRegistry`
//! (`engine/registry.rs`) — a name-keyed map built once at startup — but
//! keyed by plain async functions rather than generic workflow types, since
//! an ARIA task dispatches `module.function(ctx, arguments)` rather than
//! constructing a typed struct. An unknown name surfaces as
//! [`super::ExecutorError::OperationNotFound`], never a panic.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::{OperationContext, OperationError};

/// An operation function: takes `ctx` and the task's JSON arguments,
/// returns the value a successful task ends with.
pub type OperationFn = Arc<
    dyn Fn(
            Arc<OperationContext>,
            serde_json::Value,
        ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, OperationError>> + Send>>
        + Send
        + Sync,
>;

/// Maps a task's `function` name to the handler that runs it.
#[derive(Default, Clone)]
pub struct OperationRegistry {
    operations: HashMap<String, OperationFn>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(Arc<OperationContext>, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, OperationError>> + Send + 'static,
    {
        let wrapped: OperationFn = Arc::new(move |ctx, args| Box::pin(handler(ctx, args)));
        self.operations.insert(name.into(), wrapped);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<OperationFn> {
        self.operations.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InMemoryResourceStore;
    use crate::model::RunsOn;
    use crate::persistence::InMemoryModelStore;
    use uuid::Uuid;

    fn sample_ctx() -> Arc<OperationContext> {
        Arc::new(OperationContext::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            None,
            RunsOn::Node,
            Arc::new(InMemoryModelStore::new()),
            Arc::new(InMemoryResourceStore::new()),
        ))
    }

    #[tokio::test]
    async fn registered_operation_is_found_and_runs() {
        let mut registry = OperationRegistry::new();
        registry.register("plugin.echo", |_ctx, args| async move { Ok(args) });

        assert!(registry.contains("plugin.echo"));
        let handler = registry.get("plugin.echo").unwrap();
        let result = handler(sample_ctx(), serde_json::json!({"a": 1})).await.unwrap();
        assert_eq!(result, serde_json::json!({"a": 1}));
    }

    #[test]
    fn unknown_name_is_absent() {
        let registry = OperationRegistry::new();
        assert!(!registry.contains("plugin.missing"));
        assert!(registry.get("plugin.missing").is_none());
    }
}
