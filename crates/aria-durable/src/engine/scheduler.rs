//! The scheduling loop (§4.5), directly grounded on AriaTosca `engine.py`'s
//! `execute()`: dispatch whatever is executable, terminalize on end states,
//! poll, repeat. One [`WorkflowEngine`] drives exactly one execution at a
//! time — callers wanting concurrent executions spawn one `execute()` call
//! per execution id.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::context::{OperationContext, ResourceStore};
use crate::events::{register_task_handlers, register_workflow_handlers, EventBus, Signal};
use crate::executor::Executor;
use crate::model::{persist_changes, ExecutionStatus, ExecutorKind, Task, TaskStatus};
use crate::persistence::ModelStore;
use crate::reliability::RetryPolicy;

use super::config::EngineConfig;
use super::error::EngineError;

/// Drives one execution's tasks to completion against a [`ModelStore`],
/// dispatching real tasks to whichever [`Executor`] is registered for their
/// `executor_kind` and completing stub tasks directly.
pub struct WorkflowEngine {
    store: Arc<dyn ModelStore>,
    resources: Arc<dyn ResourceStore>,
    bus: EventBus,
    executors: HashMap<ExecutorKind, Arc<dyn Executor>>,
    retry: RetryPolicy,
    config: EngineConfig,
}

impl WorkflowEngine {
    /// Builds an engine with the task/workflow state handlers already wired
    /// onto a fresh [`EventBus`] (§4.4). Executors are added afterward via
    /// [`Self::with_executor`].
    pub fn new(
        store: Arc<dyn ModelStore>,
        resources: Arc<dyn ResourceStore>,
        retry: RetryPolicy,
        config: EngineConfig,
    ) -> Self {
        let mut bus = EventBus::new();
        register_task_handlers(&mut bus, store.clone(), retry.clone());
        register_workflow_handlers(&mut bus, store.clone(), retry.clone());
        Self {
            store,
            resources,
            bus,
            executors: HashMap::new(),
            retry,
            config,
        }
    }

    pub fn with_executor(mut self, kind: ExecutorKind, executor: Arc<dyn Executor>) -> Self {
        self.executors.insert(kind, executor);
        self
    }

    /// The bus this engine emits on; subscribe to it before calling
    /// [`Self::execute`] to observe transitions (logging, metrics, tests).
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Requests cancellation of `execution_id`. The running [`Self::execute`]
    /// loop (if any) observes the resulting `cancelling`/`cancelled` status
    /// on its next poll; already-dispatched tasks run to completion.
    pub async fn cancel_execution(&self, execution_id: Uuid) {
        self.bus.emit(Signal::WorkflowCancelling { execution_id }).await;
    }

    /// Drives `execution_id`'s tasks to completion. `resuming` re-enters an
    /// execution that was previously paused; `retry_failed` (only
    /// meaningful alongside `resuming`) resets every `failed` task back to
    /// `pending` with `attempts_count=0` first (§4.5 step 1).
    pub async fn execute(&self, execution_id: Uuid, resuming: bool, retry_failed: bool) -> Result<(), EngineError> {
        if resuming && retry_failed {
            self.reset_failed_tasks(execution_id).await?;
        }
        if resuming {
            self.bus.emit(Signal::WorkflowResume { execution_id }).await;
        }
        self.bus.emit(Signal::WorkflowStart { execution_id }).await;
        tracing::info!(%execution_id, "workflow started");

        loop {
            let execution = self.store.get_execution(execution_id).await?;
            if matches!(execution.status, ExecutionStatus::Cancelling | ExecutionStatus::Cancelled) {
                self.terminalize_wait_states(execution_id).await?;
                self.bus.emit(Signal::WorkflowCancelled { execution_id }).await;
                tracing::info!(%execution_id, "workflow cancelled");
                return Ok(());
            }

            let tasks = self.store.list_tasks(execution_id).await?;

            if let Some(failed) = tasks.iter().find(|t| t.status == TaskStatus::Failed && !t.ignore_failure) {
                let message = match &failed.error {
                    Some(reason) => format!("task {} failed: {reason}", failed.id),
                    None => format!("task {} failed and ignore_failure=false", failed.id),
                };
                self.bus
                    .emit(Signal::WorkflowFailure { execution_id, message: message.clone() })
                    .await;
                tracing::info!(%execution_id, %message, "workflow failed");
                return Ok(());
            }

            if tasks.iter().all(|t| t.status.is_end_state()) {
                self.bus.emit(Signal::WorkflowSuccess { execution_id }).await;
                tracing::info!(%execution_id, "workflow succeeded");
                return Ok(());
            }

            let status_of: HashMap<Uuid, TaskStatus> = tasks.iter().map(|t| (t.id, t.status)).collect();
            let now = Utc::now();
            for task in &tasks {
                if task.is_executable(now, |dep| status_of.get(&dep).copied()) {
                    self.dispatch(execution_id, task).await?;
                }
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn dispatch(&self, execution_id: Uuid, task: &Task) -> Result<(), EngineError> {
        if task.stub_type.is_some() {
            let now = Utc::now();
            persist_changes::<Task>(self.store.as_ref(), task.id, &self.retry, move |t| {
                t.status = TaskStatus::Success;
                t.started_at = Some(now);
                t.ended_at = Some(now);
            })
            .await?;
            return Ok(());
        }

        self.bus.emit(Signal::TaskSent { task_id: task.id }).await;

        let executor_kind = task
            .executor_kind
            .ok_or(EngineError::MissingExecutorKind(task.id))?;
        let executor = self
            .executors
            .get(&executor_kind)
            .ok_or(EngineError::UnregisteredExecutor(executor_kind))?;

        let ctx = Arc::new(OperationContext::new(
            task.id,
            execution_id,
            task.actor_id,
            task.runs_on,
            self.store.clone(),
            self.resources.clone(),
        ));
        executor.execute(task.clone(), ctx, self.bus.clone()).await?;
        Ok(())
    }

    /// Open question (spec.md §9): a retrying task's `due_at` can fall after
    /// a cancel request, leaving it in a wait state forever since nothing
    /// dispatches it and nothing else terminalizes it. Resolved here: on
    /// observing `cancelling`/`cancelled`, every remaining wait-state task
    /// is moved straight to `failed` (see DESIGN.md).
    async fn terminalize_wait_states(&self, execution_id: Uuid) -> Result<(), EngineError> {
        let tasks = self.store.list_tasks(execution_id).await?;
        let now = Utc::now();
        for task in tasks.into_iter().filter(|t| t.status.is_wait_state()) {
            persist_changes::<Task>(self.store.as_ref(), task.id, &self.retry, move |t| {
                t.status = TaskStatus::Failed;
                t.ended_at = Some(now);
            })
            .await?;
        }
        Ok(())
    }

    async fn reset_failed_tasks(&self, execution_id: Uuid) -> Result<(), EngineError> {
        let tasks = self.store.list_tasks(execution_id).await?;
        for task in tasks.into_iter().filter(|t| t.status == TaskStatus::Failed) {
            persist_changes::<Task>(self.store.as_ref(), task.id, &self.retry, |t| {
                t.status = TaskStatus::Pending;
                t.attempts_count = 0;
                t.ended_at = None;
            })
            .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InMemoryResourceStore;
    use crate::executor::{OperationRegistry, ThreadExecutor};
    use crate::model::{Execution, ExecutionStatus, RunsOn, StubType};
    use crate::persistence::InMemoryModelStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn sample_execution() -> (InMemoryModelStore, Uuid) {
        let store = InMemoryModelStore::new();
        (store, Uuid::now_v7())
    }

    async fn put_execution(store: &InMemoryModelStore, id: Uuid) {
        store
            .put_execution(Execution {
                id,
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
    }

    fn stub_task(execution_id: Uuid, stub_type: StubType, dependencies: Vec<Uuid>) -> Task {
        Task {
            id: Uuid::now_v7(),
            execution_id,
            actor_id: None,
            runs_on: RunsOn::Node,
            interface_name: None,
            operation_name: None,
            function: None,
            arguments: serde_json::Value::Null,
            plugin_id: None,
            status: TaskStatus::Pending,
            due_at: Utc::now(),
            started_at: None,
            ended_at: None,
            attempts_count: 0,
            error: None,
            max_attempts: 1,
            retry_interval: Duration::from_secs(0),
            ignore_failure: false,
            stub_type: Some(stub_type),
            executor_kind: None,
            dependencies,
            version: 0,
        }
    }

    fn operation_task(execution_id: Uuid, function: &str, dependencies: Vec<Uuid>) -> Task {
        Task {
            id: Uuid::now_v7(),
            execution_id,
            actor_id: None,
            runs_on: RunsOn::Node,
            interface_name: None,
            operation_name: None,
            function: Some(function.into()),
            arguments: serde_json::json!({}),
            plugin_id: None,
            status: TaskStatus::Pending,
            due_at: Utc::now(),
            started_at: None,
            ended_at: None,
            attempts_count: 0,
            error: None,
            max_attempts: 1,
            retry_interval: Duration::from_millis(1),
            ignore_failure: false,
            stub_type: None,
            executor_kind: Some(ExecutorKind::Thread),
            dependencies,
            version: 0,
        }
    }

    #[tokio::test]
    async fn two_stub_tasks_run_to_workflow_success() {
        let (store, execution_id) = sample_execution();
        put_execution(&store, execution_id).await;
        let start = store
            .put_task(stub_task(execution_id, StubType::StartWorkflow, vec![]))
            .await
            .unwrap();
        store
            .put_task(stub_task(execution_id, StubType::EndWorkflow, vec![start.id]))
            .await
            .unwrap();

        let store: Arc<dyn ModelStore> = Arc::new(store);
        let engine = WorkflowEngine::new(
            store.clone(),
            Arc::new(InMemoryResourceStore::new()),
            RetryPolicy::fixed(Duration::from_millis(1), 3),
            EngineConfig::new().with_poll_interval(Duration::from_millis(5)),
        );

        engine.execute(execution_id, false, false).await.unwrap();

        let execution = store.get_execution(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Succeeded);
    }

    #[tokio::test]
    async fn real_task_dispatches_through_the_thread_executor() {
        let (store, execution_id) = sample_execution();
        put_execution(&store, execution_id).await;
        let start = store
            .put_task(stub_task(execution_id, StubType::StartWorkflow, vec![]))
            .await
            .unwrap();
        let op = store
            .put_task(operation_task(execution_id, "plugin.echo", vec![start.id]))
            .await
            .unwrap();
        store
            .put_task(stub_task(execution_id, StubType::EndWorkflow, vec![op.id]))
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let mut registry = OperationRegistry::new();
        registry.register("plugin.echo", move |_ctx, args| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(args)
            }
        });

        let store: Arc<dyn ModelStore> = Arc::new(store);
        let engine = WorkflowEngine::new(
            store.clone(),
            Arc::new(InMemoryResourceStore::new()),
            RetryPolicy::fixed(Duration::from_millis(1), 3),
            EngineConfig::new().with_poll_interval(Duration::from_millis(5)),
        )
        .with_executor(ExecutorKind::Thread, Arc::new(ThreadExecutor::new(registry, 4)));

        engine.execute(execution_id, false, false).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let execution = store.get_execution(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Succeeded);
    }

    #[tokio::test]
    async fn a_failing_task_without_ignore_failure_fails_the_workflow() {
        let (store, execution_id) = sample_execution();
        put_execution(&store, execution_id).await;
        let start = store
            .put_task(stub_task(execution_id, StubType::StartWorkflow, vec![]))
            .await
            .unwrap();
        let op = store
            .put_task(operation_task(execution_id, "plugin.boom", vec![start.id]))
            .await
            .unwrap();
        store
            .put_task(stub_task(execution_id, StubType::EndWorkflow, vec![op.id]))
            .await
            .unwrap();

        let mut registry = OperationRegistry::new();
        registry.register("plugin.boom", |ctx, _args| {
            let ctx = ctx.clone();
            async move { Err(ctx.task().abort("boom")) }
        });

        let store: Arc<dyn ModelStore> = Arc::new(store);
        let engine = WorkflowEngine::new(
            store.clone(),
            Arc::new(InMemoryResourceStore::new()),
            RetryPolicy::fixed(Duration::from_millis(1), 3),
            EngineConfig::new().with_poll_interval(Duration::from_millis(5)),
        )
        .with_executor(ExecutorKind::Thread, Arc::new(ThreadExecutor::new(registry, 4)));

        engine.execute(execution_id, false, false).await.unwrap();

        let execution = store.get_execution(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn cancelling_terminalizes_a_stuck_retrying_task() {
        let (store, execution_id) = sample_execution();
        put_execution(&store, execution_id).await;
        let mut retrying = operation_task(execution_id, "plugin.never", vec![]);
        retrying.status = TaskStatus::Retrying;
        retrying.due_at = Utc::now() + chrono::Duration::hours(1);
        store.put_task(retrying).await.unwrap();

        let mut execution = store.get_execution(execution_id).await.unwrap();
        execution.transition(ExecutionStatus::Started).unwrap();
        store.update_execution(execution).await.unwrap();
        let mut execution = store.get_execution(execution_id).await.unwrap();
        execution.transition(ExecutionStatus::Cancelling).unwrap();
        store.update_execution(execution).await.unwrap();

        let store: Arc<dyn ModelStore> = Arc::new(store);
        let engine = WorkflowEngine::new(
            store.clone(),
            Arc::new(InMemoryResourceStore::new()),
            RetryPolicy::fixed(Duration::from_millis(1), 3),
            EngineConfig::new().with_poll_interval(Duration::from_millis(5)),
        );

        engine.execute(execution_id, false, false).await.unwrap();

        let execution = store.get_execution(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Cancelled);

        let tasks = store.list_tasks(execution_id).await.unwrap();
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Failed));
    }
}
