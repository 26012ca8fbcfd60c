//! Lowers an [`ApiGraph`] to persisted tasks (§4.3). Grounded directly on
//! AriaTosca's `GraphCompiler`: a start stub, a reverse-topological walk
//! that persists each API task with its already-compiled dependencies, a
//! recursive bracket around nested sub-workflows, and an end stub over
//! whatever has no dependent.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

use chrono::Utc;
use uuid::Uuid;

use crate::graph::{ApiGraph, ApiTaskId, ApiTaskNode};
use crate::model::{ExecutorKind, RunsOn, StubType, Task};
use crate::persistence::ModelStore;

use super::error::CompileError;

/// The two persisted boundary tasks a single `compile()` call produces.
/// For the root graph these are `start_workflow`/`end_workflow`; for a
/// nested sub-workflow, `start_subworkflow`/`end_subworkflow`.
#[derive(Debug, Clone, Copy)]
pub struct CompiledGraph {
    pub start_task_id: Uuid,
    pub end_task_id: Uuid,
}

/// Compiles one [`ApiGraph`] (and any sub-workflows nested within it) for a
/// single execution. Stateless across calls — the one entry point is
/// [`GraphCompiler::compile`].
pub struct GraphCompiler<'a> {
    store: &'a dyn ModelStore,
    default_executor: ExecutorKind,
}

impl<'a> GraphCompiler<'a> {
    pub fn new(store: &'a dyn ModelStore, default_executor: ExecutorKind) -> Self {
        Self {
            store,
            default_executor,
        }
    }

    /// Compiles the root graph. `depends_on` seeds the start stub's
    /// dependencies — empty for a fresh execution, or the caller's chosen
    /// predecessors when compiling is driven externally.
    pub async fn compile(
        &self,
        execution_id: Uuid,
        graph: &ApiGraph,
        depends_on: Vec<Uuid>,
    ) -> Result<CompiledGraph, CompileError> {
        let (start_task_id, end_task_id) = self
            .compile_inner(
                execution_id,
                graph,
                depends_on,
                StubType::StartWorkflow,
                StubType::EndWorkflow,
            )
            .await?;
        Ok(CompiledGraph {
            start_task_id,
            end_task_id,
        })
    }

    fn compile_inner<'b>(
        &'b self,
        execution_id: Uuid,
        graph: &'b ApiGraph,
        depends_on: Vec<Uuid>,
        start_stub_type: StubType,
        end_stub_type: StubType,
    ) -> Pin<Box<dyn Future<Output = Result<(Uuid, Uuid), CompileError>> + Send + 'b>> {
        Box::pin(async move {
            let start_task_id = self
                .persist_stub(execution_id, start_stub_type, depends_on)
                .await?;

            // persisted id of every API task compiled so far at this level,
            // keyed by API id. For a WorkflowTask this is its *end* stub,
            // per the dependency-endpoint rule (§4.3): an edge into a
            // sub-workflow always lands on its completion marker.
            let mut api_to_persisted: HashMap<ApiTaskId, Uuid> = HashMap::new();
            // persisted ids that are *somebody's* dependency at this level,
            // i.e. not leaves of the level's own dependency graph.
            let mut has_dependent: HashSet<Uuid> = HashSet::new();

            for api_id in graph.topological_order(true)? {
                let node = graph
                    .task(api_id)
                    .expect("topological_order only returns ids present in the graph");

                let api_deps = graph.get_dependencies(api_id);
                let persisted_deps: Vec<Uuid> = if api_deps.is_empty() {
                    vec![start_task_id]
                } else {
                    api_deps
                        .iter()
                        .map(|dep| {
                            *api_to_persisted
                                .get(dep)
                                .expect("dependency compiled before dependent by reverse topological order")
                        })
                        .collect()
                };
                for dep in &persisted_deps {
                    has_dependent.insert(*dep);
                }

                let persisted_id = match node {
                    ApiTaskNode::Operation(op) => {
                        self.persist_operation(execution_id, op, persisted_deps).await?
                    }
                    ApiTaskNode::Stub(_) => {
                        self.persist_stub(execution_id, StubType::Stub, persisted_deps).await?
                    }
                    ApiTaskNode::Workflow(workflow) => {
                        let (sub_start, sub_end) = self
                            .compile_inner(
                                execution_id,
                                &workflow.graph,
                                persisted_deps,
                                StubType::StartSubworkflow,
                                StubType::EndSubworkflow,
                            )
                            .await?;
                        // The sub-graph's own internals already wire
                        // sub_start as a dependency; nothing at this level
                        // depends on it directly, so it never counts as a
                        // leaf regardless.
                        has_dependent.insert(sub_start);
                        sub_end
                    }
                };
                api_to_persisted.insert(api_id, persisted_id);
            }

            let leaves: Vec<Uuid> = api_to_persisted
                .values()
                .copied()
                .filter(|id| !has_dependent.contains(id))
                .collect();
            let end_deps = if leaves.is_empty() {
                vec![start_task_id]
            } else {
                leaves
            };
            let end_task_id = self.persist_stub(execution_id, end_stub_type, end_deps).await?;

            Ok((start_task_id, end_task_id))
        })
    }

    async fn persist_stub(
        &self,
        execution_id: Uuid,
        stub_type: StubType,
        dependencies: Vec<Uuid>,
    ) -> Result<Uuid, CompileError> {
        let now = Utc::now();
        let task = Task {
            id: Uuid::now_v7(),
            execution_id,
            actor_id: None,
            runs_on: RunsOn::Node,
            interface_name: None,
            operation_name: None,
            function: None,
            arguments: serde_json::Value::Null,
            plugin_id: None,
            status: crate::model::TaskStatus::Pending,
            due_at: now,
            started_at: None,
            ended_at: None,
            attempts_count: 0,
            error: None,
            max_attempts: 1,
            retry_interval: std::time::Duration::from_secs(0),
            ignore_failure: false,
            stub_type: Some(stub_type),
            executor_kind: None,
            dependencies,
            version: 0,
        };
        let saved = self.store.put_task(task).await?;
        Ok(saved.id)
    }

    async fn persist_operation(
        &self,
        execution_id: Uuid,
        op: &crate::graph::OperationTask,
        dependencies: Vec<Uuid>,
    ) -> Result<Uuid, CompileError> {
        let now = Utc::now();
        let task = Task {
            id: Uuid::now_v7(),
            execution_id,
            actor_id: Some(op.actor_id),
            runs_on: op.runs_on,
            interface_name: Some(op.interface_name.clone()),
            operation_name: Some(op.operation_name.clone()),
            function: Some(op.function.clone()),
            arguments: op.arguments.clone(),
            plugin_id: op.plugin_id,
            status: crate::model::TaskStatus::Pending,
            due_at: now,
            started_at: None,
            ended_at: None,
            attempts_count: 0,
            error: None,
            max_attempts: op.max_attempts,
            retry_interval: op.retry_interval,
            ignore_failure: op.ignore_failure,
            stub_type: None,
            executor_kind: Some(self.default_executor),
            dependencies,
            version: 0,
        };
        let saved = self.store.put_task(task).await?;
        Ok(saved.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{OperationTask, StubTask, WorkflowTask};
    use crate::model::TaskStatus;
    use crate::persistence::InMemoryModelStore;

    fn op(actor: Uuid) -> OperationTask {
        OperationTask::new(actor, RunsOn::Node, "create", "create", "plugin.create")
    }

    #[tokio::test]
    async fn empty_graph_compiles_to_just_start_and_end() {
        let store = InMemoryModelStore::new();
        let execution_id = Uuid::now_v7();
        let graph = ApiGraph::new();

        let compiler = GraphCompiler::new(&store, ExecutorKind::Thread);
        let compiled = compiler.compile(execution_id, &graph, vec![]).await.unwrap();

        let tasks = store.list_tasks(execution_id).await.unwrap();
        assert_eq!(tasks.len(), 2);
        let end = tasks.iter().find(|t| t.id == compiled.end_task_id).unwrap();
        assert_eq!(end.dependencies, vec![compiled.start_task_id]);
        assert_eq!(end.stub_type, Some(StubType::EndWorkflow));
    }

    #[tokio::test]
    async fn two_parallel_operations_both_depend_on_start_and_gate_end() {
        let store = InMemoryModelStore::new();
        let execution_id = Uuid::now_v7();
        let mut graph = ApiGraph::new();
        graph.add_tasks([op(Uuid::now_v7()).into(), op(Uuid::now_v7()).into()]);

        let compiler = GraphCompiler::new(&store, ExecutorKind::Thread);
        let compiled = compiler.compile(execution_id, &graph, vec![]).await.unwrap();

        let tasks = store.list_tasks(execution_id).await.unwrap();
        // start + 2 operations + end
        assert_eq!(tasks.len(), 4);

        let operations: Vec<_> = tasks
            .iter()
            .filter(|t| t.stub_type.is_none())
            .collect();
        assert_eq!(operations.len(), 2);
        for task in &operations {
            assert_eq!(task.dependencies, vec![compiled.start_task_id]);
            assert_eq!(task.status, TaskStatus::Pending);
        }

        let end = tasks.iter().find(|t| t.id == compiled.end_task_id).unwrap();
        let mut end_deps = end.dependencies.clone();
        end_deps.sort();
        let mut expected: Vec<Uuid> = operations.iter().map(|t| t.id).collect();
        expected.sort();
        assert_eq!(end_deps, expected);
    }

    #[tokio::test]
    async fn sequential_chain_each_depends_on_predecessor() {
        let store = InMemoryModelStore::new();
        let execution_id = Uuid::now_v7();
        let mut graph = ApiGraph::new();
        let ids = graph.add_tasks([
            op(Uuid::now_v7()).into(),
            op(Uuid::now_v7()).into(),
        ]);
        graph.add_dependency(ids[1], ids[0]).unwrap();

        let compiler = GraphCompiler::new(&store, ExecutorKind::Thread);
        let compiled = compiler.compile(execution_id, &graph, vec![]).await.unwrap();

        let tasks = store.list_tasks(execution_id).await.unwrap();
        let first = tasks
            .iter()
            .find(|t| t.stub_type.is_none() && t.dependencies == vec![compiled.start_task_id])
            .unwrap();
        let second = tasks
            .iter()
            .find(|t| t.stub_type.is_none() && t.id != first.id)
            .unwrap();
        assert_eq!(second.dependencies, vec![first.id]);

        let end = tasks.iter().find(|t| t.id == compiled.end_task_id).unwrap();
        assert_eq!(end.dependencies, vec![second.id]);
    }

    #[tokio::test]
    async fn nested_subworkflow_brackets_with_subworkflow_stubs_and_edges_target_its_end() {
        let store = InMemoryModelStore::new();
        let execution_id = Uuid::now_v7();

        let mut inner = ApiGraph::new();
        inner.add_tasks([op(Uuid::now_v7()).into()]);

        let mut outer = ApiGraph::new();
        let before_id = outer.add_tasks([op(Uuid::now_v7()).into()])[0];
        let workflow = WorkflowTask::new(inner);
        let workflow_id = workflow.id;
        outer.add_tasks([workflow.into()]);
        outer.add_dependency(workflow_id, before_id).unwrap();

        let compiler = GraphCompiler::new(&store, ExecutorKind::Thread);
        let compiled = compiler.compile(execution_id, &outer, vec![]).await.unwrap();

        let tasks = store.list_tasks(execution_id).await.unwrap();
        let sub_start = tasks
            .iter()
            .find(|t| t.stub_type == Some(StubType::StartSubworkflow))
            .unwrap();
        let sub_end = tasks
            .iter()
            .find(|t| t.stub_type == Some(StubType::EndSubworkflow))
            .unwrap();

        let before_task = tasks
            .iter()
            .find(|t| t.stub_type.is_none() && t.dependencies == vec![compiled.start_task_id])
            .unwrap();
        assert_eq!(sub_start.dependencies, vec![before_task.id]);

        let outer_end = tasks.iter().find(|t| t.id == compiled.end_task_id).unwrap();
        assert_eq!(outer_end.dependencies, vec![sub_end.id]);
    }

    #[tokio::test]
    async fn stub_task_is_persisted_with_stub_type_stub() {
        let store = InMemoryModelStore::new();
        let execution_id = Uuid::now_v7();
        let mut graph = ApiGraph::new();
        graph.add_tasks([StubTask::new().into()]);

        let compiler = GraphCompiler::new(&store, ExecutorKind::Thread);
        compiler.compile(execution_id, &graph, vec![]).await.unwrap();

        let tasks = store.list_tasks(execution_id).await.unwrap();
        assert!(tasks.iter().any(|t| t.stub_type == Some(StubType::Stub)));
    }
}
