//! Task and workflow state handlers (§4.4). Registered on the event bus at
//! engine construction time; each wraps its writes in
//! [`crate::model::persist_changes`] so they land atomically with
//! optimistic-concurrency retries.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::model::{
    lifecycle_states, persist_changes, Execution, ExecutionStatus, NodeState, RunsOn, Task, TaskStatus,
    STANDARD_INTERFACE,
};
use crate::persistence::ModelStore;
use crate::reliability::RetryPolicy;

use super::bus::{EventBus, Signal, SignalKind, TaskFailureKind};

/// Register the four `task.*` handlers on `bus`.
pub fn register_task_handlers(bus: &mut EventBus, store: Arc<dyn ModelStore>, retry: RetryPolicy) {
    let s = store.clone();
    let r = retry.clone();
    bus.subscribe(
        SignalKind::TaskSent,
        Arc::new(move |signal| {
            let store = s.clone();
            let retry = r.clone();
            Box::pin(async move {
                let Signal::TaskSent { task_id } = signal else {
                    unreachable!()
                };
                persist_changes::<Task>(store.as_ref(), task_id, &retry, |task| {
                    task.status = TaskStatus::Sent;
                })
                .await?;
                Ok(())
            })
        }),
    );

    let s = store.clone();
    let r = retry.clone();
    bus.subscribe(
        SignalKind::TaskStart,
        Arc::new(move |signal| {
            let store = s.clone();
            let retry = r.clone();
            Box::pin(async move {
                let Signal::TaskStart { task_id } = signal else {
                    unreachable!()
                };
                let now = Utc::now();
                let task = persist_changes::<Task>(store.as_ref(), task_id, &retry, move |task| {
                    task.status = TaskStatus::Started;
                    task.started_at = Some(now);
                })
                .await?;
                update_node_state(store.as_ref(), &retry, &task, true).await?;
                Ok(())
            })
        }),
    );

    let s = store.clone();
    let r = retry.clone();
    bus.subscribe(
        SignalKind::TaskSuccess,
        Arc::new(move |signal| {
            let store = s.clone();
            let retry = r.clone();
            Box::pin(async move {
                let Signal::TaskSuccess { task_id } = signal else {
                    unreachable!()
                };
                let now = Utc::now();
                let task = persist_changes::<Task>(store.as_ref(), task_id, &retry, move |task| {
                    task.status = TaskStatus::Success;
                    task.ended_at = Some(now);
                })
                .await?;
                update_node_state(store.as_ref(), &retry, &task, false).await?;
                Ok(())
            })
        }),
    );

    let s = store;
    let r = retry;
    bus.subscribe(
        SignalKind::TaskFailure,
        Arc::new(move |signal| {
            let store = s.clone();
            let retry = r.clone();
            Box::pin(async move {
                let Signal::TaskFailure { task_id, exception } = signal else {
                    unreachable!()
                };
                handle_task_failure(store.as_ref(), &retry, task_id, exception).await
            })
        }),
    );
}

/// `ignore_failure=true` suppresses retry unconditionally (it does not wait
/// for attempts to exhaust) — see the corrected precedence in DESIGN.md.
/// It does not change *this* handler's outcome (the task still ends
/// `failed`); it instead gates the workflow engine's failure propagation
/// for an ended `failed` task.
async fn handle_task_failure(
    store: &dyn ModelStore,
    retry: &RetryPolicy,
    task_id: Uuid,
    exception: TaskFailureKind,
) -> anyhow::Result<()> {
    let now = Utc::now();
    persist_changes::<Task>(store, task_id, retry, move |task| {
        let should_retry = !exception.is_abort()
            && !task.ignore_failure
            && task.has_attempts_remaining();
        task.error = Some(exception.message().to_string());
        if should_retry {
            let interval = match &exception {
                TaskFailureKind::Error {
                    retry_interval: Some(interval),
                    ..
                } => *interval,
                _ => task.retry_interval,
            };
            task.status = TaskStatus::Retrying;
            task.attempts_count += 1;
            task.due_at = now + chrono::Duration::from_std(interval).unwrap_or_default();
        } else {
            task.status = TaskStatus::Failed;
            task.ended_at = Some(now);
        }
    })
    .await?;
    Ok(())
}

/// Only for operations whose interface matches a TOSCA standard lifecycle
/// identifier (§4.4 node-state table). `transitional` selects whether the
/// node moves to the transitional or final state of that operation.
async fn update_node_state(
    store: &dyn ModelStore,
    retry: &RetryPolicy,
    task: &Task,
    transitional: bool,
) -> anyhow::Result<()> {
    if task.interface_name.as_deref() != Some(STANDARD_INTERFACE) {
        return Ok(());
    }
    let Some(operation_name) = &task.operation_name else {
        return Ok(());
    };
    let Some((transitional_state, final_state)) = lifecycle_states(operation_name) else {
        return Ok(());
    };
    let Some(node_id) = resolve_actor_node_id(store, task).await? else {
        return Ok(());
    };
    let target = if transitional {
        transitional_state
    } else {
        final_state
    };
    persist_changes::<crate::model::Node>(store, node_id, retry, move |node| {
        node.state = target;
    })
    .await?;
    Ok(())
}

/// Resolves the node whose state a lifecycle task actually drives: the
/// actor itself when `runs_on = node`, or the relationship's source/target
/// node otherwise.
async fn resolve_actor_node_id(store: &dyn ModelStore, task: &Task) -> anyhow::Result<Option<Uuid>> {
    let Some(actor_id) = task.actor_id else {
        return Ok(None);
    };
    match task.runs_on {
        RunsOn::Node => Ok(Some(actor_id)),
        RunsOn::Source => Ok(Some(store.get_relationship(actor_id).await?.source_id)),
        RunsOn::Target => Ok(Some(store.get_relationship(actor_id).await?.target_id)),
    }
}

/// Register the six `workflow.*` handlers on `bus`.
pub fn register_workflow_handlers(bus: &mut EventBus, store: Arc<dyn ModelStore>, retry: RetryPolicy) {
    let s = store.clone();
    let r = retry.clone();
    bus.subscribe(
        SignalKind::WorkflowStart,
        Arc::new(move |signal| {
            let store = s.clone();
            let retry = r.clone();
            Box::pin(async move {
                let Signal::WorkflowStart { execution_id } = signal else {
                    unreachable!()
                };
                let now = Utc::now();
                persist_changes::<Execution>(store.as_ref(), execution_id, &retry, move |execution| {
                    if matches!(
                        execution.status,
                        ExecutionStatus::Cancelling | ExecutionStatus::Cancelled
                    ) {
                        return;
                    }
                    execution.status = ExecutionStatus::Started;
                    execution.started_at = Some(now);
                })
                .await?;
                Ok(())
            })
        }),
    );

    let s = store.clone();
    let r = retry.clone();
    bus.subscribe(
        SignalKind::WorkflowSuccess,
        Arc::new(move |signal| {
            let store = s.clone();
            let retry = r.clone();
            Box::pin(async move {
                let Signal::WorkflowSuccess { execution_id } = signal else {
                    unreachable!()
                };
                let now = Utc::now();
                persist_changes::<Execution>(store.as_ref(), execution_id, &retry, move |execution| {
                    execution.status = ExecutionStatus::Succeeded;
                    execution.ended_at = Some(now);
                })
                .await?;
                Ok(())
            })
        }),
    );

    let s = store.clone();
    let r = retry.clone();
    bus.subscribe(
        SignalKind::WorkflowFailure,
        Arc::new(move |signal| {
            let store = s.clone();
            let retry = r.clone();
            Box::pin(async move {
                let Signal::WorkflowFailure { execution_id, message } = signal else {
                    unreachable!()
                };
                let now = Utc::now();
                persist_changes::<Execution>(store.as_ref(), execution_id, &retry, move |execution| {
                    execution.status = ExecutionStatus::Failed;
                    execution.error = Some(message.clone());
                    execution.ended_at = Some(now);
                })
                .await?;
                Ok(())
            })
        }),
    );

    let s = store.clone();
    let r = retry.clone();
    bus.subscribe(
        SignalKind::WorkflowCancelling,
        Arc::new(move |signal| {
            let store = s.clone();
            let retry = r.clone();
            Box::pin(async move {
                let Signal::WorkflowCancelling { execution_id } = signal else {
                    unreachable!()
                };
                let now = Utc::now();
                persist_changes::<Execution>(store.as_ref(), execution_id, &retry, move |execution| {
                    match execution.status {
                        ExecutionStatus::Pending => {
                            execution.status = ExecutionStatus::Cancelled;
                            execution.ended_at = Some(now);
                        }
                        status if status.is_end_state() => {
                            tracing::info!(%execution_id, "cancel requested on already-terminal execution, ignoring");
                        }
                        _ => {
                            execution.status = ExecutionStatus::Cancelling;
                        }
                    }
                })
                .await?;
                Ok(())
            })
        }),
    );

    let s = store.clone();
    let r = retry.clone();
    bus.subscribe(
        SignalKind::WorkflowCancelled,
        Arc::new(move |signal| {
            let store = s.clone();
            let retry = r.clone();
            Box::pin(async move {
                let Signal::WorkflowCancelled { execution_id } = signal else {
                    unreachable!()
                };
                let now = Utc::now();
                persist_changes::<Execution>(store.as_ref(), execution_id, &retry, move |execution| {
                    if execution.status.is_end_state() {
                        tracing::info!(%execution_id, "already terminal, ignoring workflow.cancelled");
                        return;
                    }
                    execution.status = ExecutionStatus::Cancelled;
                    execution.ended_at = Some(now);
                })
                .await?;
                Ok(())
            })
        }),
    );

    let s = store;
    let r = retry;
    bus.subscribe(
        SignalKind::WorkflowResume,
        Arc::new(move |signal| {
            let store = s.clone();
            let retry = r.clone();
            Box::pin(async move {
                let Signal::WorkflowResume { execution_id } = signal else {
                    unreachable!()
                };
                persist_changes::<Execution>(store.as_ref(), execution_id, &retry, |execution| {
                    execution.status = ExecutionStatus::Pending;
                })
                .await?;
                for task in store.list_tasks(execution_id).await? {
                    if !task.status.is_end_state() {
                        persist_changes::<Task>(store.as_ref(), task.id, &retry, |task| {
                            task.status = TaskStatus::Pending;
                        })
                        .await?;
                    }
                }
                Ok(())
            })
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Node, RunsOn, TaskStatus};
    use crate::persistence::InMemoryModelStore;
    use std::time::Duration;

    fn base_store_with_node() -> (InMemoryModelStore, Uuid, Uuid) {
        (InMemoryModelStore::new(), Uuid::now_v7(), Uuid::now_v7())
    }

    /// Mirrors how the built-in workflows actually construct a lifecycle
    /// task (`prepare::workflow::node_op_ids`): `interface_name` is always
    /// the literal `"Standard"`, and the lifecycle verb lives in
    /// `operation_name`.
    fn sample_task(execution_id: Uuid, actor_id: Uuid, operation_name: &str) -> Task {
        Task {
            id: Uuid::now_v7(),
            execution_id,
            actor_id: Some(actor_id),
            runs_on: RunsOn::Node,
            interface_name: Some(STANDARD_INTERFACE.into()),
            operation_name: Some(operation_name.into()),
            function: Some("plugin.op".into()),
            arguments: serde_json::json!({}),
            plugin_id: None,
            status: TaskStatus::Sent,
            due_at: Utc::now(),
            started_at: None,
            ended_at: None,
            attempts_count: 0,
            error: None,
            max_attempts: 3,
            retry_interval: Duration::from_millis(1),
            ignore_failure: false,
            stub_type: None,
            executor_kind: Some(crate::model::ExecutorKind::Thread),
            dependencies: vec![],
            version: 0,
        }
    }

    #[tokio::test]
    async fn task_start_updates_node_to_transitional_state() {
        let (store, execution_id, actor_id) = base_store_with_node();
        store
            .put_node(Node {
                id: actor_id,
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
        let task = store
            .put_task(sample_task(execution_id, actor_id, "create"))
            .await
            .unwrap();

        let store: Arc<dyn ModelStore> = Arc::new(store);
        let mut bus = EventBus::new();
        register_task_handlers(&mut bus, store.clone(), RetryPolicy::fixed(Duration::from_millis(1), 3));

        bus.emit(Signal::TaskStart { task_id: task.id }).await;

        let node = store.get_node(actor_id).await.unwrap();
        assert_eq!(node.state, NodeState::Creating);
        let updated_task = store.get_task(task.id).await.unwrap();
        assert_eq!(updated_task.status, TaskStatus::Started);
    }

    #[tokio::test]
    async fn non_standard_interface_leaves_node_state_untouched() {
        let (store, execution_id, actor_id) = base_store_with_node();
        store
            .put_node(Node {
                id: actor_id,
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
        let mut task = sample_task(execution_id, actor_id, "create");
        task.interface_name = Some("Configure".into());
        let task = store.put_task(task).await.unwrap();

        let store: Arc<dyn ModelStore> = Arc::new(store);
        let mut bus = EventBus::new();
        register_task_handlers(&mut bus, store.clone(), RetryPolicy::fixed(Duration::from_millis(1), 3));

        bus.emit(Signal::TaskStart { task_id: task.id }).await;

        let node = store.get_node(actor_id).await.unwrap();
        assert_eq!(node.state, NodeState::Initial);
    }

    #[tokio::test]
    async fn ignore_failure_suppresses_retry_on_first_failure() {
        let (store, execution_id, actor_id) = base_store_with_node();
        let mut task = sample_task(execution_id, actor_id, "create");
        task.ignore_failure = true;
        task.max_attempts = 5;
        let task = store.put_task(task).await.unwrap();

        let store: Arc<dyn ModelStore> = Arc::new(store);
        let mut bus = EventBus::new();
        register_task_handlers(&mut bus, store.clone(), RetryPolicy::fixed(Duration::from_millis(1), 3));

        bus.emit(Signal::TaskFailure {
            task_id: task.id,
            exception: TaskFailureKind::Error {
                message: "boom".into(),
                retry_interval: None,
            },
        })
        .await;

        let updated = store.get_task(task.id).await.unwrap();
        assert_eq!(updated.status, TaskStatus::Failed);
        assert_eq!(updated.attempts_count, 0);
    }

    #[tokio::test]
    async fn retries_when_attempts_remain_and_not_ignoring_failure() {
        let (store, execution_id, actor_id) = base_store_with_node();
        let task = store
            .put_task(sample_task(execution_id, actor_id, "create"))
            .await
            .unwrap();

        let store: Arc<dyn ModelStore> = Arc::new(store);
        let mut bus = EventBus::new();
        register_task_handlers(&mut bus, store.clone(), RetryPolicy::fixed(Duration::from_millis(1), 3));

        bus.emit(Signal::TaskFailure {
            task_id: task.id,
            exception: TaskFailureKind::Error {
                message: "boom".into(),
                retry_interval: None,
            },
        })
        .await;

        let updated = store.get_task(task.id).await.unwrap();
        assert_eq!(updated.status, TaskStatus::Retrying);
        assert_eq!(updated.attempts_count, 1);
    }

    #[tokio::test]
    async fn abort_never_retries_even_with_attempts_remaining() {
        let (store, execution_id, actor_id) = base_store_with_node();
        let task = store
            .put_task(sample_task(execution_id, actor_id, "create"))
            .await
            .unwrap();

        let store: Arc<dyn ModelStore> = Arc::new(store);
        let mut bus = EventBus::new();
        register_task_handlers(&mut bus, store.clone(), RetryPolicy::fixed(Duration::from_millis(1), 3));

        bus.emit(Signal::TaskFailure {
            task_id: task.id,
            exception: TaskFailureKind::Abort {
                message: "boom".into(),
            },
        })
        .await;

        let updated = store.get_task(task.id).await.unwrap();
        assert_eq!(updated.status, TaskStatus::Failed);
        assert_eq!(updated.attempts_count, 0);
    }
}
