//! Workflow declarations and the built-in `install`/`uninstall`/`start`/
//! `stop` workflows (§4.10, §6 "Built-in workflows").
//!
//! A workflow function is a plain async closure from
//! `(WorkflowContext, inputs)` to an [`ApiGraph`] — the Rust-native
//! replacement for the source's dynamic import of a `workflows.py` module
//! attribute. [`WorkflowRegistry`] is populated with the four built-ins at
//! construction and accepts additional declarations from the embedding
//! application.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::graph::{ApiGraph, ApiTaskId, OperationTask, TaskRef};
use crate::model::{Node, Relationship, RunsOn, STANDARD_INTERFACE};
use crate::persistence::ModelStore;

use super::error::PrepareError;

/// The shape an input value is checked against. `None` on a declaration
/// means any JSON value is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowInputType {
    String,
    Integer,
    Number,
    Boolean,
    List,
    Object,
}

impl WorkflowInputType {
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::List => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

impl std::fmt::Display for WorkflowInputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::List => "list",
            Self::Object => "object",
        };
        write!(f, "{s}")
    }
}

/// One declared workflow input: whether it's required, its expected type
/// (if any), and a default value substituted when the caller omits it.
#[derive(Debug, Clone, Default)]
pub struct WorkflowInputDecl {
    pub required: bool,
    pub input_type: Option<WorkflowInputType>,
    pub default: Option<Value>,
}

impl WorkflowInputDecl {
    pub fn required(input_type: WorkflowInputType) -> Self {
        Self {
            required: true,
            input_type: Some(input_type),
            default: None,
        }
    }

    pub fn optional(default: Value) -> Self {
        Self {
            required: false,
            input_type: None,
            default: Some(default),
        }
    }
}

/// A workflow function: builds the [`ApiGraph`] a prepared execution
/// compiles. Takes ownership of its [`WorkflowContext`] rather than
/// borrowing it, since it runs once per `prepare()` call behind a boxed
/// future.
pub type WorkflowFn = Arc<
    dyn Fn(WorkflowContext, Value) -> Pin<Box<dyn Future<Output = Result<ApiGraph, PrepareError>> + Send>>
        + Send
        + Sync,
>;

/// Passed to a workflow function: identifies the service/execution it is
/// building a graph for, plus read access to the service's current
/// topology. Holds no back-reference to the preparer or the engine.
#[derive(Clone)]
pub struct WorkflowContext {
    store: Arc<dyn ModelStore>,
    pub service_id: Uuid,
    pub execution_id: Uuid,
}

impl WorkflowContext {
    pub fn new(store: Arc<dyn ModelStore>, service_id: Uuid, execution_id: Uuid) -> Self {
        Self {
            store,
            service_id,
            execution_id,
        }
    }

    pub async fn nodes(&self) -> Result<Vec<Node>, crate::persistence::StoreError> {
        self.store.list_nodes(self.service_id).await
    }

    pub async fn relationships(&self) -> Result<Vec<Relationship>, crate::persistence::StoreError> {
        self.store.list_relationships(self.service_id).await
    }
}

/// One registered workflow: its declared inputs plus the function that
/// builds its graph.
#[derive(Clone)]
pub struct WorkflowDeclaration {
    pub name: String,
    pub inputs: HashMap<String, WorkflowInputDecl>,
    pub function: WorkflowFn,
}

/// Name -> declaration. Pre-populated with the built-in `install`,
/// `uninstall`, `start`, `stop` workflows, which declare no inputs — any
/// input supplied to one is rejected as undeclared (§6).
#[derive(Clone)]
pub struct WorkflowRegistry {
    declarations: HashMap<String, WorkflowDeclaration>,
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        let mut declarations = HashMap::new();
        for (name, function) in builtins() {
            declarations.insert(
                name.to_string(),
                WorkflowDeclaration {
                    name: name.to_string(),
                    inputs: HashMap::new(),
                    function,
                },
            );
        }
        Self { declarations }
    }

    pub fn register(&mut self, declaration: WorkflowDeclaration) {
        self.declarations.insert(declaration.name.clone(), declaration);
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowDeclaration> {
        self.declarations.get(name)
    }
}

fn builtins() -> Vec<(&'static str, WorkflowFn)> {
    vec![
        ("install", wrap(builtin_install)),
        ("uninstall", wrap(builtin_uninstall)),
        ("start", wrap(builtin_start)),
        ("stop", wrap(builtin_stop)),
    ]
}

fn wrap<F, Fut>(f: F) -> WorkflowFn
where
    F: Fn(WorkflowContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ApiGraph, PrepareError>> + Send + 'static,
{
    Arc::new(move |ctx, _inputs| Box::pin(f(ctx)))
}

const RELATIONSHIP_INTERFACE: &str = "Configure";

/// Per-node task ids this workflow has compiled so far, keyed by the
/// standard lifecycle operation name that produced them.
type NodeOps = HashMap<Uuid, HashMap<&'static str, ApiTaskId>>;

async fn node_op_ids(
    graph: &mut ApiGraph,
    nodes: &[Node],
    operations: &[&'static str],
) -> Result<NodeOps, PrepareError> {
    let mut node_ops: NodeOps = HashMap::new();
    for node in nodes {
        let mut ops_for_node = HashMap::new();
        let mut ids_in_order = Vec::new();
        for op_name in operations {
            let Some(operation) = node
                .interfaces
                .get(STANDARD_INTERFACE)
                .and_then(|iface| iface.operations.get(*op_name))
            else {
                continue;
            };
            let task = OperationTask::new(node.id, RunsOn::Node, STANDARD_INTERFACE, *op_name, operation.function.clone())
                .with_arguments(Value::Object(operation.inputs.clone().into_iter().collect::<Map<_, _>>()));
            let task = match operation.plugin_id {
                Some(plugin_id) => task.with_plugin(plugin_id),
                None => task,
            };
            let id = graph.add_tasks([task.into()])[0];
            ops_for_node.insert(*op_name, id);
            ids_in_order.push(TaskRef::One(id));
        }
        graph.sequence(&ids_in_order)?;
        node_ops.insert(node.id, ops_for_node);
    }
    Ok(node_ops)
}

/// Looks up one relationship operation under [`RELATIONSHIP_INTERFACE`] and
/// adds it to the graph if declared, returning its task id.
fn relationship_op(
    graph: &mut ApiGraph,
    relationship: &Relationship,
    op_name: &'static str,
    runs_on: RunsOn,
) -> Option<ApiTaskId> {
    let operation = relationship
        .interfaces
        .get(RELATIONSHIP_INTERFACE)
        .and_then(|iface| iface.operations.get(op_name))?;
    let task = OperationTask::new(relationship.id, runs_on, RELATIONSHIP_INTERFACE, op_name, operation.function.clone())
        .with_arguments(Value::Object(operation.inputs.clone().into_iter().collect::<Map<_, _>>()));
    let task = match operation.plugin_id {
        Some(plugin_id) => task.with_plugin(plugin_id),
        None => task,
    };
    Some(graph.add_tasks([task.into()])[0])
}

fn some_ids(ids: &[Option<&ApiTaskId>]) -> Vec<ApiTaskId> {
    ids.iter().filter_map(|id| id.copied()).collect()
}

/// Standard TOSCA install: create/configure/start per node, with the
/// relationship's Configure-interface operations interleaved between the
/// matching lifecycle stage on both endpoints (§4.10, DESIGN.md "built-in
/// workflow shape").
async fn builtin_install(ctx: WorkflowContext) -> Result<ApiGraph, PrepareError> {
    let nodes = ctx.nodes().await?;
    let relationships = ctx.relationships().await?;
    let mut graph = ApiGraph::new();

    let node_ops = node_op_ids(&mut graph, &nodes, &["create", "configure", "start"]).await?;

    for relationship in &relationships {
        let source_ops = node_ops.get(&relationship.source_id);
        let target_ops = node_ops.get(&relationship.target_id);
        let (Some(source_ops), Some(target_ops)) = (source_ops, target_ops) else {
            continue;
        };

        let preconfigure_source = relationship_op(&mut graph, relationship, "preconfigure_source", RunsOn::Source);
        let preconfigure_target = relationship_op(&mut graph, relationship, "preconfigure_target", RunsOn::Target);
        let create_deps = some_ids(&[source_ops.get("create"), target_ops.get("create")]);
        if !create_deps.is_empty() {
            for id in [preconfigure_source, preconfigure_target].into_iter().flatten() {
                graph.add_dependency(id, TaskRef::from(create_deps.clone()))?;
            }
        }
        if let (Some(configure), Some(pre)) = (source_ops.get("configure"), preconfigure_source) {
            graph.add_dependency(*configure, pre)?;
        }
        if let (Some(configure), Some(pre)) = (target_ops.get("configure"), preconfigure_target) {
            graph.add_dependency(*configure, pre)?;
        }

        let postconfigure_source = relationship_op(&mut graph, relationship, "postconfigure_source", RunsOn::Source);
        let postconfigure_target = relationship_op(&mut graph, relationship, "postconfigure_target", RunsOn::Target);
        let configure_deps = some_ids(&[source_ops.get("configure"), target_ops.get("configure")]);
        if !configure_deps.is_empty() {
            for id in [postconfigure_source, postconfigure_target].into_iter().flatten() {
                graph.add_dependency(id, TaskRef::from(configure_deps.clone()))?;
            }
        }
        if let (Some(start), Some(post)) = (source_ops.get("start"), postconfigure_source) {
            graph.add_dependency(*start, post)?;
        }
        if let (Some(start), Some(post)) = (target_ops.get("start"), postconfigure_target) {
            graph.add_dependency(*start, post)?;
        }

        let add_source = relationship_op(&mut graph, relationship, "add_source", RunsOn::Source);
        let add_target = relationship_op(&mut graph, relationship, "add_target", RunsOn::Target);
        let start_deps = some_ids(&[source_ops.get("start"), target_ops.get("start")]);
        if !start_deps.is_empty() {
            for id in [add_source, add_target].into_iter().flatten() {
                graph.add_dependency(id, TaskRef::from(start_deps.clone()))?;
            }
        }
    }

    Ok(graph)
}

/// Reverse of [`builtin_install`]: unwire relationships, then stop/delete
/// every node.
async fn builtin_uninstall(ctx: WorkflowContext) -> Result<ApiGraph, PrepareError> {
    let nodes = ctx.nodes().await?;
    let relationships = ctx.relationships().await?;
    let mut graph = ApiGraph::new();

    let mut remove_ids: HashMap<Uuid, Vec<ApiTaskId>> = HashMap::new();
    for relationship in &relationships {
        if let Some(id) = relationship_op(&mut graph, relationship, "remove_source", RunsOn::Source) {
            remove_ids.entry(relationship.source_id).or_default().push(id);
        }
        if let Some(id) = relationship_op(&mut graph, relationship, "remove_target", RunsOn::Target) {
            remove_ids.entry(relationship.target_id).or_default().push(id);
        }
    }

    for node in &nodes {
        let mut ops_for_node = Vec::new();
        for op_name in ["stop", "delete"] {
            let Some(operation) = node
                .interfaces
                .get(STANDARD_INTERFACE)
                .and_then(|iface| iface.operations.get(op_name))
            else {
                continue;
            };
            let task = OperationTask::new(node.id, RunsOn::Node, STANDARD_INTERFACE, op_name, operation.function.clone());
            let id = graph.add_tasks([task.into()])[0];
            if op_name == "stop" {
                if let Some(deps) = remove_ids.get(&node.id) {
                    graph.add_dependency(id, TaskRef::from(deps.clone()))?;
                }
            }
            ops_for_node.push(TaskRef::One(id));
        }
        graph.sequence(&ops_for_node)?;
    }

    Ok(graph)
}

/// `start` revisits only the `start` lifecycle operation on every node —
/// used to bring a stopped service back up without recreating it.
async fn builtin_start(ctx: WorkflowContext) -> Result<ApiGraph, PrepareError> {
    let nodes = ctx.nodes().await?;
    let mut graph = ApiGraph::new();
    node_op_ids(&mut graph, &nodes, &["start"]).await?;
    Ok(graph)
}

/// `stop` revisits only the `stop` lifecycle operation on every node.
async fn builtin_stop(ctx: WorkflowContext) -> Result<ApiGraph, PrepareError> {
    let nodes = ctx.nodes().await?;
    let mut graph = ApiGraph::new();
    node_op_ids(&mut graph, &nodes, &["stop"]).await?;
    Ok(graph)
}
