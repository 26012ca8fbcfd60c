//! Subprocess executor (§4.8): spawns `aria-task-runner` as a child process
//! per task and exchanges [`WireMessage`] frames with it over a fresh
//! loopback TCP connection, rather than the in-process dispatch
//! [`super::ThreadExecutor`] uses. The child also gets a [`CtxProxy`] socket
//! for `ctx.*` calls (§4.9) — the same HTTP surface an external script uses
//! — so both dispatch paths share one implementation of `ctx`.
//!
//! Unlike the source's persistent worker processes, a fresh child is spawned
//! per task and torn down once it reports a terminal outcome: there is no
//! long-lived subprocess pool to keep warm, matching ARIA's "plugins run
//! once per operation" model.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::context::{CtxProxy, OperationContext, CTX_SOCKET_URL_VAR};
use crate::events::{EventBus, Signal, TaskFailureKind};
use crate::model::{persist_changes, EntityKind, Node, Task, TrackedChange};
use crate::persistence::{ModelStore, StoreError};
use crate::reliability::{bounded, RetryPolicy, TimeoutConfig};

use super::error::ExecutorError;
use super::wire::{read_frame, WireMessage};
use super::Executor;

/// Environment variables the spawned `aria-task-runner` reads.
pub const ARIA_WIRE_ADDR_VAR: &str = "ARIA_WIRE_ADDR";
pub const ARIA_TASK_ID_VAR: &str = "ARIA_TASK_ID";
pub const ARIA_FUNCTION_VAR: &str = "ARIA_FUNCTION";
pub const ARIA_ARGUMENTS_VAR: &str = "ARIA_ARGUMENTS";

/// Spawns one `aria-task-runner` child per task, bounded by `max_concurrency`
/// simultaneous children.
pub struct SubprocessExecutor {
    runner_path: PathBuf,
    timeouts: TimeoutConfig,
    semaphore: Arc<Semaphore>,
}

impl SubprocessExecutor {
    pub fn new(runner_path: impl Into<PathBuf>, timeouts: TimeoutConfig, max_concurrency: usize) -> Self {
        Self {
            runner_path: runner_path.into(),
            timeouts,
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    async fn run_one(
        runner_path: PathBuf,
        timeouts: TimeoutConfig,
        task: Task,
        ctx: Arc<OperationContext>,
        bus: EventBus,
    ) {
        let task_id = task.id;
        if let Err(err) = Self::try_run_one(runner_path, timeouts, task, ctx.clone(), bus.clone()).await {
            tracing::error!(%task_id, error = %err, "subprocess executor failed before the runner reported an outcome");
            bus.emit(Signal::TaskFailure {
                task_id,
                exception: TaskFailureKind::Error {
                    message: err.to_string(),
                    retry_interval: None,
                },
            })
            .await;
        }
    }

    async fn try_run_one(
        runner_path: PathBuf,
        timeouts: TimeoutConfig,
        task: Task,
        ctx: Arc<OperationContext>,
        bus: EventBus,
    ) -> Result<(), ExecutorError> {
        let function = task.function.clone().ok_or(ExecutorError::MissingFunction(task.id))?;

        let listener = TcpListener::bind("127.0.0.1:0").await.map_err(ExecutorError::Spawn)?;
        let wire_addr = listener.local_addr().map_err(ExecutorError::Spawn)?;

        let proxy = CtxProxy::bind(ctx.clone()).await?;

        let mut command = Command::new(&runner_path);
        command
            .env(CTX_SOCKET_URL_VAR, proxy.socket_url())
            .env(ARIA_WIRE_ADDR_VAR, wire_addr.to_string())
            .env(ARIA_TASK_ID_VAR, task.id.to_string())
            .env(ARIA_FUNCTION_VAR, &function)
            .env(ARIA_ARGUMENTS_VAR, task.arguments.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                proxy.shutdown().await;
                return Err(ExecutorError::Spawn(err));
            }
        };

        let accepted = bounded(timeouts.terminate, listener.accept()).await;
        let mut stream = match accepted {
            Ok(Ok((stream, _peer))) => stream,
            Ok(Err(err)) => {
                let _ = child.kill().await;
                proxy.shutdown().await;
                return Err(ExecutorError::Spawn(err));
            }
            Err(timeout_err) => {
                let _ = child.kill().await;
                proxy.shutdown().await;
                return Err(timeout_err.into());
            }
        };

        let store = ctx.store_handle();
        let retry = RetryPolicy::fixed(Duration::from_millis(20), 5);

        let outcome = loop {
            match read_frame(&mut stream).await {
                Ok(Some(WireMessage::Started { task_id })) => {
                    bus.emit(Signal::TaskStart { task_id }).await;
                }
                Ok(Some(WireMessage::Succeeded { task_id, tracked_changes, .. })) => {
                    apply_tracked_changes(store.as_ref(), &retry, &tracked_changes).await?;
                    break Some(Signal::TaskSuccess { task_id });
                }
                Ok(Some(WireMessage::Failed { task_id, message, is_abort, retry_interval_ms, tracked_changes })) => {
                    apply_tracked_changes(store.as_ref(), &retry, &tracked_changes).await?;
                    let exception = if is_abort {
                        TaskFailureKind::Abort { message }
                    } else {
                        TaskFailureKind::Error {
                            message,
                            retry_interval: retry_interval_ms.map(Duration::from_millis),
                        }
                    };
                    break Some(Signal::TaskFailure { task_id, exception });
                }
                Ok(Some(WireMessage::Closed { .. })) | Ok(None) => break None,
                Err(err) => return Err(ExecutorError::Wire(err.to_string())),
            }
        };

        let _ = bounded(timeouts.terminate, child.wait()).await;
        proxy.shutdown().await;

        if let Some(signal) = outcome {
            bus.emit(signal).await;
        } else {
            return Err(ExecutorError::Wire(format!(
                "runner for task {} closed the connection without reporting an outcome",
                task.id
            )));
        }
        Ok(())
    }
}

/// Applies the diffs a finished task shipped home. Node changes land in the
/// node's `attributes` map (matching `ctx.node.attributes[attribute] = value`
/// inside an operation); the other entity kinds patch the named top-level
/// field on the entity itself.
async fn apply_tracked_changes(
    store: &dyn ModelStore,
    retry: &RetryPolicy,
    changes: &[TrackedChange],
) -> Result<(), ExecutorError> {
    for change in changes {
        match change.entity_kind {
            EntityKind::Node => {
                let attribute = change.attribute.clone();
                let value = change.new.clone();
                persist_changes::<Node>(store, change.entity_id, retry, move |node| {
                    node.attributes.insert(attribute.clone(), value.clone());
                })
                .await
                .map_err(store_err_to_wire)?;
            }
            EntityKind::Task => {
                let attribute = change.attribute.clone();
                let value = change.new.clone();
                persist_changes::<Task>(store, change.entity_id, retry, move |task| {
                    patch_field(task, &attribute, value.clone());
                })
                .await
                .map_err(store_err_to_wire)?;
            }
            EntityKind::Execution => {
                let attribute = change.attribute.clone();
                let value = change.new.clone();
                persist_changes::<crate::model::Execution>(store, change.entity_id, retry, move |execution| {
                    patch_field(execution, &attribute, value.clone());
                })
                .await
                .map_err(store_err_to_wire)?;
            }
            EntityKind::Relationship => {
                patch_relationship(store, retry, change.entity_id, &change.attribute, change.new.clone()).await?;
            }
        }
    }
    Ok(())
}

/// Round-trips `entity` through JSON to overwrite one top-level field by
/// name. Used for entities that aren't a plain attribute map the way a node
/// is — the fallback a generic tracked change needs when it targets one of
/// the struct's own fields rather than a nested map.
fn patch_field<T: serde::Serialize + serde::de::DeserializeOwned>(entity: &mut T, field: &str, value: serde_json::Value) {
    let Ok(serde_json::Value::Object(mut map)) = serde_json::to_value(&*entity) else {
        return;
    };
    map.insert(field.to_string(), value);
    if let Ok(updated) = serde_json::from_value(serde_json::Value::Object(map)) {
        *entity = updated;
    }
}

/// [`crate::model::Relationship`] has no [`crate::model::Persisted`] impl
/// (nothing else in this crate needs to `persist_changes` one), so this
/// re-implements the same fetch/mutate/retry-on-conflict loop directly
/// against the store.
async fn patch_relationship(
    store: &dyn ModelStore,
    retry: &RetryPolicy,
    id: Uuid,
    attribute: &str,
    value: serde_json::Value,
) -> Result<(), ExecutorError> {
    let mut attempt = 1;
    loop {
        let mut relationship = store.get_relationship(id).await.map_err(store_err_to_wire)?;
        patch_field(&mut relationship, attribute, value.clone());
        match store.update_relationship(relationship).await {
            Ok(_) => return Ok(()),
            Err(StoreError::VersionConflict { .. }) if retry.has_attempts_remaining(attempt) => {
                tokio::time::sleep(retry.delay_for_attempt(attempt + 1)).await;
                attempt += 1;
            }
            Err(other) => return Err(store_err_to_wire(other)),
        }
    }
}

fn store_err_to_wire(err: StoreError) -> ExecutorError {
    ExecutorError::Wire(err.to_string())
}

#[async_trait]
impl Executor for SubprocessExecutor {
    async fn execute(&self, task: Task, ctx: Arc<OperationContext>, bus: EventBus) -> Result<(), ExecutorError> {
        if task.function.is_none() {
            return Err(ExecutorError::MissingFunction(task.id));
        }
        let runner_path = self.runner_path.clone();
        let timeouts = self.timeouts;
        let semaphore = self.semaphore.clone();

        tokio::spawn(async move {
            let Ok(permit) = semaphore.acquire_owned().await else {
                return;
            };
            Self::run_one(runner_path, timeouts, task, ctx, bus).await;
            drop(permit);
        });

        Ok(())
    }

    async fn terminate(&self, _task_id: Uuid) -> Result<(), ExecutorError> {
        // Each child is already torn down as soon as it reports a terminal
        // outcome; there is no separately tracked handle left to kill early.
        Ok(())
    }

    async fn close(&self) -> Result<(), ExecutorError> {
        Ok(())
    }
}
