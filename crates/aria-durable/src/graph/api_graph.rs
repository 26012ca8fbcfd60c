//! [`ApiGraph`]: the in-memory DAG a workflow function builds before the
//! compiler lowers it to persisted tasks (§4.2).

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use uuid::Uuid;

use crate::model::RunsOn;

use super::error::GraphError;

/// Identifies a task within an [`ApiGraph`]. Nothing is persisted at this
/// layer, so this is just a locally-unique handle, not a [`crate::model::Task`] id.
pub type ApiTaskId = Uuid;

/// A reference to one or a group of API tasks. Dependency operations accept
/// a `TaskRef` on either side so a caller can fan a single task in/out of N
/// peers in one call (§4.2: "an N-element group fans in/out of the peer"),
/// and groups may themselves contain groups.
#[derive(Debug, Clone)]
pub enum TaskRef {
    One(ApiTaskId),
    Group(Vec<TaskRef>),
}

impl TaskRef {
    /// Flattens nested groups into the set of leaf task ids they name.
    fn flatten_into(&self, out: &mut Vec<ApiTaskId>) {
        match self {
            Self::One(id) => out.push(*id),
            Self::Group(refs) => {
                for r in refs {
                    r.flatten_into(out);
                }
            }
        }
    }

    fn flatten(&self) -> Vec<ApiTaskId> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }
}

impl From<ApiTaskId> for TaskRef {
    fn from(id: ApiTaskId) -> Self {
        Self::One(id)
    }
}

impl From<Vec<ApiTaskId>> for TaskRef {
    fn from(ids: Vec<ApiTaskId>) -> Self {
        Self::Group(ids.into_iter().map(TaskRef::One).collect())
    }
}

impl<'a> From<&'a [ApiTaskId]> for TaskRef {
    fn from(ids: &'a [ApiTaskId]) -> Self {
        Self::Group(ids.iter().copied().map(TaskRef::One).collect())
    }
}

/// An operation bound to a node or relationship actor (§4.2).
#[derive(Debug, Clone)]
pub struct OperationTask {
    pub id: ApiTaskId,
    pub actor_id: Uuid,
    pub runs_on: RunsOn,
    pub interface_name: String,
    pub operation_name: String,
    pub function: String,
    pub arguments: serde_json::Value,
    pub max_attempts: i32,
    pub retry_interval: Duration,
    pub ignore_failure: bool,
    pub plugin_id: Option<Uuid>,
}

impl OperationTask {
    pub fn new(
        actor_id: Uuid,
        runs_on: RunsOn,
        interface_name: impl Into<String>,
        operation_name: impl Into<String>,
        function: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            actor_id,
            runs_on,
            interface_name: interface_name.into(),
            operation_name: operation_name.into(),
            function: function.into(),
            arguments: serde_json::Value::Object(Default::default()),
            max_attempts: 1,
            retry_interval: Duration::from_secs(30),
            ignore_failure: false,
            plugin_id: None,
        }
    }

    pub fn with_arguments(mut self, arguments: serde_json::Value) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_ignore_failure(mut self, ignore_failure: bool) -> Self {
        self.ignore_failure = ignore_failure;
        self
    }

    pub fn with_plugin(mut self, plugin_id: Uuid) -> Self {
        self.plugin_id = Some(plugin_id);
        self
    }
}

/// A nested sub-workflow: the graph returned by calling another workflow
/// function (§4.2). The compiler brackets `graph` with its own
/// start/end-subworkflow stub pair.
#[derive(Debug, Clone)]
pub struct WorkflowTask {
    pub id: ApiTaskId,
    pub graph: ApiGraph,
}

impl WorkflowTask {
    pub fn new(graph: ApiGraph) -> Self {
        Self {
            id: Uuid::now_v7(),
            graph,
        }
    }
}

/// An ordering-only task with no execution (§4.2).
#[derive(Debug, Clone)]
pub struct StubTask {
    pub id: ApiTaskId,
}

impl StubTask {
    pub fn new() -> Self {
        Self { id: Uuid::now_v7() }
    }
}

impl Default for StubTask {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub enum ApiTaskNode {
    Operation(OperationTask),
    Workflow(WorkflowTask),
    Stub(StubTask),
}

impl ApiTaskNode {
    pub fn id(&self) -> ApiTaskId {
        match self {
            Self::Operation(t) => t.id,
            Self::Workflow(t) => t.id,
            Self::Stub(t) => t.id,
        }
    }
}

impl From<OperationTask> for ApiTaskNode {
    fn from(t: OperationTask) -> Self {
        Self::Operation(t)
    }
}

impl From<WorkflowTask> for ApiTaskNode {
    fn from(t: WorkflowTask) -> Self {
        Self::Workflow(t)
    }
}

impl From<StubTask> for ApiTaskNode {
    fn from(t: StubTask) -> Self {
        Self::Stub(t)
    }
}

/// The in-memory DAG built inside a workflow function. Pure staging object
/// — nothing here is persisted until [`crate::compiler::GraphCompiler`]
/// runs (§4.2).
#[derive(Debug, Clone, Default)]
pub struct ApiGraph {
    tasks: HashMap<ApiTaskId, ApiTaskNode>,
    /// Insertion order, so iteration (and the tie-break inside
    /// `topological_order`) is deterministic.
    order: Vec<ApiTaskId>,
    /// `dependent -> {its dependencies}`.
    dependencies: HashMap<ApiTaskId, BTreeSet<ApiTaskId>>,
}

impl ApiGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn task(&self, id: ApiTaskId) -> Option<&ApiTaskNode> {
        self.tasks.get(&id)
    }

    /// Every task currently in the graph, in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &ApiTaskNode> {
        self.order.iter().filter_map(move |id| self.tasks.get(id))
    }

    fn require(&self, id: ApiTaskId) -> Result<(), GraphError> {
        if self.tasks.contains_key(&id) {
            Ok(())
        } else {
            Err(GraphError::UnknownTask(id))
        }
    }

    /// Adds tasks (and any nested sub-workflow graphs they carry) to the
    /// graph, returning their ids in the order given.
    pub fn add_tasks(&mut self, tasks: impl IntoIterator<Item = ApiTaskNode>) -> Vec<ApiTaskId> {
        let mut ids = Vec::new();
        for task in tasks {
            let id = task.id();
            self.order.push(id);
            self.dependencies.entry(id).or_default();
            self.tasks.insert(id, task);
            ids.push(id);
        }
        ids
    }

    /// Removes tasks and any dependency edges that reference them, on
    /// either side.
    pub fn remove_tasks(&mut self, ids: &[ApiTaskId]) {
        for id in ids {
            self.tasks.remove(id);
            self.order.retain(|existing| existing != id);
            self.dependencies.remove(id);
        }
        for deps in self.dependencies.values_mut() {
            for id in ids {
                deps.remove(id);
            }
        }
    }

    /// `dependent` will not be scheduled until every task `dependency`
    /// resolves to has reached an end state. Accepts single tasks or
    /// groups on either side; a group fans every element of one side in/out
    /// of every element of the other (§4.2).
    pub fn add_dependency(
        &mut self,
        dependent: impl Into<TaskRef>,
        dependency: impl Into<TaskRef>,
    ) -> Result<(), GraphError> {
        let dependents = dependent.into().flatten();
        let dependencies = dependency.into().flatten();
        for id in dependents.iter().chain(dependencies.iter()) {
            self.require(*id)?;
        }
        for d in &dependents {
            let entry = self.dependencies.entry(*d).or_default();
            for dep in &dependencies {
                entry.insert(*dep);
            }
        }
        Ok(())
    }

    pub fn has_dependency(&self, dependent: ApiTaskId, dependency: ApiTaskId) -> bool {
        self.dependencies
            .get(&dependent)
            .map(|deps| deps.contains(&dependency))
            .unwrap_or(false)
    }

    pub fn remove_dependency(
        &mut self,
        dependent: impl Into<TaskRef>,
        dependency: impl Into<TaskRef>,
    ) -> Result<(), GraphError> {
        let dependents = dependent.into().flatten();
        let dependencies = dependency.into().flatten();
        for id in dependents.iter().chain(dependencies.iter()) {
            self.require(*id)?;
        }
        for d in &dependents {
            if let Some(set) = self.dependencies.get_mut(d) {
                for dep in &dependencies {
                    set.remove(dep);
                }
            }
        }
        Ok(())
    }

    /// Adds pairwise dependencies so each task depends on the one before it:
    /// `t2` depends on `t1`, `t3` depends on `t2`, etc.
    pub fn sequence(&mut self, tasks: &[TaskRef]) -> Result<(), GraphError> {
        for pair in tasks.windows(2) {
            self.add_dependency(pair[1].clone(), pair[0].clone())?;
        }
        Ok(())
    }

    pub fn get_dependencies(&self, id: ApiTaskId) -> Vec<ApiTaskId> {
        self.dependencies
            .get(&id)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn get_dependents(&self, id: ApiTaskId) -> Vec<ApiTaskId> {
        self.dependencies
            .iter()
            .filter(|(_, deps)| deps.contains(&id))
            .map(|(dependent, _)| *dependent)
            .collect()
    }

    /// A linear order over the graph's tasks. `reverse = true` yields
    /// dependency-first order — a task never appears before everything it
    /// depends on — which is what [`crate::compiler::GraphCompiler`] needs
    /// so that a dependency's persisted id exists by the time a dependent
    /// is compiled. `reverse = false` yields the opposite, dependents-first
    /// order. Errors on a cycle, which `add_dependency`/`sequence` alone
    /// never introduce but a hand-built graph could.
    pub fn topological_order(&self, reverse: bool) -> Result<Vec<ApiTaskId>, GraphError> {
        let mut in_degree: HashMap<ApiTaskId, usize> =
            self.order.iter().map(|id| (*id, 0)).collect();
        let mut dependents_of: HashMap<ApiTaskId, Vec<ApiTaskId>> = HashMap::new();
        for (dependent, deps) in &self.dependencies {
            *in_degree.entry(*dependent).or_insert(0) += deps.len();
            for dep in deps {
                dependents_of.entry(*dep).or_default().push(*dependent);
            }
        }

        let mut queue: VecDeque<ApiTaskId> = self
            .order
            .iter()
            .filter(|id| in_degree.get(*id).copied().unwrap_or(0) == 0)
            .copied()
            .collect();

        let mut dependency_first = Vec::with_capacity(self.order.len());
        while let Some(id) = queue.pop_front() {
            dependency_first.push(id);
            if let Some(dependents) = dependents_of.get(&id) {
                for dependent in dependents {
                    let degree = in_degree.get_mut(dependent).expect("tracked in_degree entry");
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*dependent);
                    }
                }
            }
        }

        if dependency_first.len() != self.order.len() {
            return Err(GraphError::Cycle);
        }

        if reverse {
            Ok(dependency_first)
        } else {
            dependency_first.reverse();
            Ok(dependency_first)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunsOn;

    fn op(name: &str) -> OperationTask {
        OperationTask::new(Uuid::now_v7(), RunsOn::Node, "create", name, "plugin.create")
    }

    #[test]
    fn add_tasks_then_dependency_round_trips() {
        let mut graph = ApiGraph::new();
        let ids = graph.add_tasks([op("a").into(), op("b").into()]);
        graph.add_dependency(ids[1], ids[0]).unwrap();

        assert!(graph.has_dependency(ids[1], ids[0]));
        assert_eq!(graph.get_dependencies(ids[1]), vec![ids[0]]);
        assert_eq!(graph.get_dependents(ids[0]), vec![ids[1]]);
    }

    #[test]
    fn add_dependency_rejects_unknown_task() {
        let mut graph = ApiGraph::new();
        let ids = graph.add_tasks([op("a").into()]);
        let err = graph.add_dependency(Uuid::now_v7(), ids[0]).unwrap_err();
        assert_eq!(err, GraphError::UnknownTask(err_id(&err)));
    }

    fn err_id(err: &GraphError) -> ApiTaskId {
        match err {
            GraphError::UnknownTask(id) => *id,
            _ => panic!("expected UnknownTask"),
        }
    }

    #[test]
    fn sequence_chains_pairwise_dependencies() {
        let mut graph = ApiGraph::new();
        let ids = graph.add_tasks([op("a").into(), op("b").into(), op("c").into()]);
        let refs: Vec<TaskRef> = ids.iter().map(|id| TaskRef::One(*id)).collect();
        graph.sequence(&refs).unwrap();

        assert!(graph.has_dependency(ids[1], ids[0]));
        assert!(graph.has_dependency(ids[2], ids[1]));
        assert!(!graph.has_dependency(ids[2], ids[0]));
    }

    #[test]
    fn group_dependency_fans_every_pair() {
        let mut graph = ApiGraph::new();
        let ids = graph.add_tasks([op("a").into(), op("b").into(), op("c").into()]);
        // c depends on the group {a, b}
        graph
            .add_dependency(ids[2], TaskRef::from(vec![ids[0], ids[1]]))
            .unwrap();

        assert!(graph.has_dependency(ids[2], ids[0]));
        assert!(graph.has_dependency(ids[2], ids[1]));
    }

    #[test]
    fn remove_tasks_drops_edges_referencing_them() {
        let mut graph = ApiGraph::new();
        let ids = graph.add_tasks([op("a").into(), op("b").into()]);
        graph.add_dependency(ids[1], ids[0]).unwrap();

        graph.remove_tasks(&[ids[0]]);

        assert!(graph.task(ids[0]).is_none());
        assert!(graph.get_dependencies(ids[1]).is_empty());
    }

    #[test]
    fn topological_order_reverse_true_is_dependency_first() {
        let mut graph = ApiGraph::new();
        let ids = graph.add_tasks([op("a").into(), op("b").into()]);
        graph.add_dependency(ids[1], ids[0]).unwrap();

        let order = graph.topological_order(true).unwrap();
        let pos_a = order.iter().position(|id| *id == ids[0]).unwrap();
        let pos_b = order.iter().position(|id| *id == ids[1]).unwrap();
        assert!(pos_a < pos_b, "dependency must precede dependent");
    }

    #[test]
    fn topological_order_reverse_false_is_dependents_first() {
        let mut graph = ApiGraph::new();
        let ids = graph.add_tasks([op("a").into(), op("b").into()]);
        graph.add_dependency(ids[1], ids[0]).unwrap();

        let order = graph.topological_order(false).unwrap();
        let pos_a = order.iter().position(|id| *id == ids[0]).unwrap();
        let pos_b = order.iter().position(|id| *id == ids[1]).unwrap();
        assert!(pos_b < pos_a, "dependent must precede dependency");
    }

    #[test]
    fn cycle_is_rejected() {
        let mut graph = ApiGraph::new();
        let ids = graph.add_tasks([op("a").into(), op("b").into()]);
        graph.add_dependency(ids[1], ids[0]).unwrap();
        graph.add_dependency(ids[0], ids[1]).unwrap();

        assert_eq!(graph.topological_order(true), Err(GraphError::Cycle));
    }
}
