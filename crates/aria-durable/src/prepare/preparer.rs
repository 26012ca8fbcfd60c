//! Turns a `(service, workflow name, inputs)` request into a compiled,
//! runnable execution (§4.10). The one public entry point other crates in
//! this workspace call to start or resume a workflow.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::compiler::GraphCompiler;
use crate::model::{Execution, ExecutionStatus, ExecutorKind, StubType};
use crate::persistence::ModelStore;

use super::error::PrepareError;
use super::workflow::{WorkflowContext, WorkflowInputDecl, WorkflowRegistry};

/// The two persisted boundary tasks the engine needs to start scheduling:
/// everything in between was compiled by [`crate::compiler::GraphCompiler`].
#[derive(Debug, Clone, Copy)]
pub struct PreparedExecution {
    pub execution_id: Uuid,
    pub start_task_id: Uuid,
    pub end_task_id: Uuid,
}

/// Validates and merges `supplied` against `declared`, filling in defaults
/// and surfacing missing/undeclared/mistyped inputs as [`PrepareError`]
/// (§4.10 "input validation", §7).
fn validate_and_merge(
    declared: &std::collections::HashMap<String, WorkflowInputDecl>,
    supplied: Value,
) -> Result<Value, PrepareError> {
    let supplied_map = match supplied {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(PrepareError::WrongInputType {
                name: "<inputs>".into(),
                expected: "object".into(),
                got: json_type_name(&other),
            })
        }
    };

    let mut undeclared: Vec<String> = supplied_map
        .keys()
        .filter(|key| !declared.contains_key(*key))
        .cloned()
        .collect();
    if !undeclared.is_empty() {
        undeclared.sort();
        return Err(PrepareError::UndeclaredInputs(undeclared));
    }

    let mut merged = Map::new();
    let mut missing = Vec::new();
    for (name, decl) in declared {
        match supplied_map.get(name) {
            Some(value) => {
                if let Some(expected) = decl.input_type {
                    if !expected.accepts(value) {
                        return Err(PrepareError::WrongInputType {
                            name: name.clone(),
                            expected: expected.to_string(),
                            got: json_type_name(value),
                        });
                    }
                }
                merged.insert(name.clone(), value.clone());
            }
            None => match &decl.default {
                Some(default) => {
                    merged.insert(name.clone(), default.clone());
                }
                None if decl.required => missing.push(name.clone()),
                None => {}
            },
        }
    }
    if !missing.is_empty() {
        missing.sort();
        return Err(PrepareError::MissingRequiredInputs(missing));
    }
    Ok(Value::Object(merged))
}

fn json_type_name(value: &Value) -> String {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
    .to_string()
}

/// Builds the compiled graph for a fresh execution, or rebinds to an
/// already-prepared one when resuming after a crash.
pub struct ExecutionPreparer {
    store: Arc<dyn ModelStore>,
    workflows: WorkflowRegistry,
    default_executor: ExecutorKind,
}

impl ExecutionPreparer {
    pub fn new(store: Arc<dyn ModelStore>, workflows: WorkflowRegistry, default_executor: ExecutorKind) -> Self {
        Self {
            store,
            workflows,
            default_executor,
        }
    }

    /// Prepares an execution to run. If `resume_execution_id` is given, no
    /// new execution is created — the caller already has one (e.g. the
    /// engine restarting after a crash) and only wants its start/end stub
    /// ids back (§4.10 "resuming a prepared execution").
    pub async fn prepare(
        &self,
        service_id: Uuid,
        workflow_name: &str,
        inputs: Value,
        resume_execution_id: Option<Uuid>,
    ) -> Result<PreparedExecution, PrepareError> {
        if let Some(execution_id) = resume_execution_id {
            return self.rebind(execution_id).await;
        }

        let declaration = self
            .workflows
            .get(workflow_name)
            .ok_or_else(|| PrepareError::UnknownWorkflow(workflow_name.to_string()))?;

        let merged_inputs = validate_and_merge(&declaration.inputs, inputs)?;

        let active = self.store.list_active_executions(service_id).await?;
        if !active.is_empty() {
            return Err(PrepareError::ActiveExecutionExists { service_id });
        }

        let execution = self
            .store
            .put_execution(Execution {
                id: Uuid::now_v7(),
                service_id,
                workflow_name: workflow_name.to_string(),
                status: ExecutionStatus::Pending,
                created_at: Utc::now(),
                started_at: None,
                ended_at: None,
                inputs: merged_inputs.clone(),
                error: None,
                version: 0,
            })
            .await?;

        let ctx = WorkflowContext::new(self.store.clone(), service_id, execution.id);
        let graph = (declaration.function)(ctx, merged_inputs).await?;

        let compiler = GraphCompiler::new(self.store.as_ref(), self.default_executor);
        let compiled = compiler.compile(execution.id, &graph, Vec::new()).await?;

        Ok(PreparedExecution {
            execution_id: execution.id,
            start_task_id: compiled.start_task_id,
            end_task_id: compiled.end_task_id,
        })
    }

    async fn rebind(&self, execution_id: Uuid) -> Result<PreparedExecution, PrepareError> {
        let tasks = self.store.list_tasks(execution_id).await?;
        let start_task_id = tasks
            .iter()
            .find(|task| task.stub_type == Some(StubType::StartWorkflow))
            .map(|task| task.id)
            .ok_or(PrepareError::Store(crate::persistence::StoreError::NotFound(execution_id)))?;
        let end_task_id = tasks
            .iter()
            .find(|task| task.stub_type == Some(StubType::EndWorkflow))
            .map(|task| task.id)
            .ok_or(PrepareError::Store(crate::persistence::StoreError::NotFound(execution_id)))?;
        Ok(PreparedExecution {
            execution_id,
            start_task_id,
            end_task_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Interface, Node, NodeState, Operation, Relationship};
    use crate::persistence::InMemoryModelStore;
    use std::collections::HashMap;

    fn standard_op(function: &str) -> Operation {
        Operation {
            function: function.to_string(),
            implementation: None,
            plugin_id: None,
            inputs: HashMap::new(),
        }
    }

    fn node_with_standard_lifecycle(service_id: Uuid) -> Node {
        let mut operations = HashMap::new();
        for op in ["create", "configure", "start"] {
            operations.insert(op.to_string(), standard_op(&format!("plugin.{op}")));
        }
        Node {
            id: Uuid::now_v7(),
            service_id,
            node_type: "Compute".into(),
            state: NodeState::Initial,
            interfaces: HashMap::from([("Standard".to_string(), Interface { operations })]),
            attributes: Default::default(),
            host_id: None,
            version: 0,
        }
    }

    fn relationship_with_all_configure_ops(service_id: Uuid, source_id: Uuid, target_id: Uuid) -> Relationship {
        let mut operations = HashMap::new();
        for op in [
            "preconfigure_source",
            "preconfigure_target",
            "postconfigure_source",
            "postconfigure_target",
            "add_source",
            "add_target",
        ] {
            operations.insert(op.to_string(), standard_op(&format!("plugin.{op}")));
        }
        Relationship {
            id: Uuid::now_v7(),
            service_id,
            source_id,
            target_id,
            interfaces: HashMap::from([("Configure".to_string(), Interface { operations })]),
            version: 0,
        }
    }

    #[tokio::test]
    async fn prepares_a_two_node_install_into_fourteen_tasks() {
        let store: Arc<dyn ModelStore> = Arc::new(InMemoryModelStore::new());
        let service_id = Uuid::now_v7();

        let source = node_with_standard_lifecycle(service_id);
        let target = node_with_standard_lifecycle(service_id);
        store.put_node(source.clone()).await.unwrap();
        store.put_node(target.clone()).await.unwrap();
        store
            .put_relationship(relationship_with_all_configure_ops(service_id, source.id, target.id))
            .await
            .unwrap();

        let preparer = ExecutionPreparer::new(store.clone(), WorkflowRegistry::new(), ExecutorKind::Thread);
        let prepared = preparer
            .prepare(service_id, "install", Value::Null, None)
            .await
            .unwrap();

        let tasks = store.list_tasks(prepared.execution_id).await.unwrap();
        assert_eq!(tasks.len(), 14);
    }

    #[tokio::test]
    async fn unknown_workflow_is_rejected() {
        let store: Arc<dyn ModelStore> = Arc::new(InMemoryModelStore::new());
        let preparer = ExecutionPreparer::new(store, WorkflowRegistry::new(), ExecutorKind::Thread);
        let err = preparer
            .prepare(Uuid::now_v7(), "not_a_workflow", Value::Null, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PrepareError::UnknownWorkflow(_)));
    }

    #[tokio::test]
    async fn undeclared_input_to_a_builtin_is_rejected() {
        let store: Arc<dyn ModelStore> = Arc::new(InMemoryModelStore::new());
        let preparer = ExecutionPreparer::new(store, WorkflowRegistry::new(), ExecutorKind::Thread);
        let err = preparer
            .prepare(Uuid::now_v7(), "install", serde_json::json!({"replicas": 3}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PrepareError::UndeclaredInputs(_)));
    }

    #[tokio::test]
    async fn a_second_prepare_while_one_is_active_is_rejected() {
        let store: Arc<dyn ModelStore> = Arc::new(InMemoryModelStore::new());
        let service_id = Uuid::now_v7();
        let preparer = ExecutionPreparer::new(store.clone(), WorkflowRegistry::new(), ExecutorKind::Thread);
        preparer.prepare(service_id, "install", Value::Null, None).await.unwrap();
        let err = preparer
            .prepare(service_id, "install", Value::Null, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PrepareError::ActiveExecutionExists { .. }));
    }

    #[tokio::test]
    async fn resuming_rebinds_to_the_existing_start_and_end_stubs() {
        let store: Arc<dyn ModelStore> = Arc::new(InMemoryModelStore::new());
        let service_id = Uuid::now_v7();
        let preparer = ExecutionPreparer::new(store.clone(), WorkflowRegistry::new(), ExecutorKind::Thread);
        let first = preparer.prepare(service_id, "install", Value::Null, None).await.unwrap();

        let resumed = preparer
            .prepare(service_id, "install", Value::Null, Some(first.execution_id))
            .await
            .unwrap();
        assert_eq!(resumed.execution_id, first.execution_id);
        assert_eq!(resumed.start_task_id, first.start_task_id);
        assert_eq!(resumed.end_task_id, first.end_task_id);
    }
}
