//! The scheduled unit of execution: a task row plus its lifecycle state
//! machine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::node::RunsOn;

/// Task status. Wait states = `{pending, retrying}`; end states =
/// `{success, failed}` (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Retrying,
    Sent,
    Started,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn is_wait_state(self) -> bool {
        matches!(self, Self::Pending | Self::Retrying)
    }

    pub fn is_end_state(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Sent => "sent",
            Self::Started => "started",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Marks a compiler-inserted ordering task. `None` means a real operation
/// task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StubType {
    StartWorkflow,
    EndWorkflow,
    StartSubworkflow,
    EndSubworkflow,
    Stub,
}

/// Which [`crate::executor::Executor`] a real (non-stub) task is dispatched
/// to. Recorded on the task by the graph compiler (§4.3: "Executor default
/// is the run-time default") rather than chosen per-task by the workflow
/// author — the API graph's `OperationTask` carries no executor preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    Thread,
    Subprocess,
}

/// `max_attempts` of -1 means retry forever.
pub const INFINITE_RETRIES: i32 = -1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,
    pub execution_id: Uuid,
    /// The node or relationship this task acts on. `None` for stub tasks.
    pub actor_id: Option<Uuid>,
    pub runs_on: RunsOn,
    pub interface_name: Option<String>,
    pub operation_name: Option<String>,
    /// Fully-qualified dispatch name. `None` for stub tasks.
    pub function: Option<String>,
    #[serde(default)]
    pub arguments: serde_json::Value,
    pub plugin_id: Option<Uuid>,
    pub status: TaskStatus,
    pub due_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub attempts_count: u32,
    /// The message from the most recent `task.failure` (abort, retry, or
    /// plain error), kept for diagnostics and surfaced verbatim in
    /// `execution.error` when this task's failure ends the workflow (§3:
    /// "per-task diagnostics persist on the task row").
    #[serde(default)]
    pub error: Option<String>,
    /// -1 = infinite, see [`INFINITE_RETRIES`].
    pub max_attempts: i32,
    #[serde(with = "duration_millis")]
    pub retry_interval: Duration,
    pub ignore_failure: bool,
    pub stub_type: Option<StubType>,
    /// `None` for stub tasks, which the engine dispatches directly without
    /// an executor (§4.5). Always `Some` for real operation tasks.
    pub executor_kind: Option<ExecutorKind>,
    pub dependencies: Vec<Uuid>,
    pub version: i64,
}

impl Task {
    /// A task is executable iff it's in a wait state, its `due_at` has
    /// passed, and every dependency is in an end state (§3 invariant).
    ///
    /// `dependency_status` resolves a dependency's current [`TaskStatus`];
    /// callers typically close over an in-memory index of the execution's
    /// tasks.
    pub fn is_executable(&self, now: DateTime<Utc>, mut dependency_status: impl FnMut(Uuid) -> Option<TaskStatus>) -> bool {
        if !self.status.is_wait_state() || self.due_at > now {
            return false;
        }
        self.dependencies.iter().all(|dep| {
            dependency_status(*dep).map(TaskStatus::is_end_state).unwrap_or(false)
        })
    }

    /// Whether another retry attempt remains. `max_attempts = -1` always
    /// returns true.
    pub fn has_attempts_remaining(&self) -> bool {
        self.max_attempts == INFINITE_RETRIES || (self.attempts_count as i32) < self.max_attempts
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_task() -> Task {
        Task {
            id: Uuid::now_v7(),
            execution_id: Uuid::now_v7(),
            actor_id: Some(Uuid::now_v7()),
            runs_on: RunsOn::Node,
            interface_name: Some("create".into()),
            operation_name: Some("create".into()),
            function: Some("plugin.create".into()),
            arguments: serde_json::json!({}),
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
            stub_type: None,
            executor_kind: Some(ExecutorKind::Thread),
            dependencies: vec![],
            version: 0,
        }
    }

    #[test]
    fn executable_with_no_dependencies_and_due_now() {
        let task = base_task();
        assert!(task.is_executable(Utc::now(), |_| None));
    }

    #[test]
    fn not_executable_before_due_at() {
        let mut task = base_task();
        task.due_at = Utc::now() + chrono::Duration::seconds(60);
        assert!(!task.is_executable(Utc::now(), |_| None));
    }

    #[test]
    fn not_executable_with_pending_dependency() {
        let mut task = base_task();
        let dep = Uuid::now_v7();
        task.dependencies.push(dep);
        assert!(!task.is_executable(Utc::now(), move |id| if id == dep {
            Some(TaskStatus::Pending)
        } else {
            None
        }));
    }

    #[test]
    fn executable_once_dependency_reaches_end_state() {
        let mut task = base_task();
        let dep = Uuid::now_v7();
        task.dependencies.push(dep);
        assert!(task.is_executable(Utc::now(), move |id| if id == dep {
            Some(TaskStatus::Failed)
        } else {
            None
        }));
    }

    #[test]
    fn infinite_retries_never_exhaust() {
        let mut task = base_task();
        task.max_attempts = INFINITE_RETRIES;
        task.attempts_count = 1000;
        assert!(task.has_attempts_remaining());
    }

    #[test]
    fn bounded_retries_exhaust() {
        let mut task = base_task();
        task.max_attempts = 3;
        task.attempts_count = 3;
        assert!(!task.has_attempts_remaining());
    }
}
