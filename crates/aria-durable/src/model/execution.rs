//! One invocation of a workflow against a service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Execution status. Exactly these six names are externally observable
/// (§6 "Execution status strings" — compatibility depends on preserving
/// them as-is).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Started,
    Cancelling,
    Cancelled,
    Succeeded,
    Failed,
}

impl ExecutionStatus {
    /// End states: `succeeded`, `failed`, `cancelled`.
    pub fn is_end_state(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Active = not an end state. At most one active execution per service
    /// is allowed at a time (§3 invariant).
    pub fn is_active(self) -> bool {
        !self.is_end_state()
    }

    /// Whether `self -> next` is a legal transition per the table in §3.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Started)
                | (Pending, Cancelled)
                | (Started, Succeeded)
                | (Started, Failed)
                | (Started, Cancelled)
                | (Started, Cancelling)
                | (Cancelling, Cancelled)
                | (Cancelling, Failed)
                | (Cancelling, Succeeded)
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Error raised when a caller attempts an illegal execution status
/// transition.
#[derive(Debug, thiserror::Error)]
#[error("illegal execution transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub id: Uuid,
    pub service_id: Uuid,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub inputs: serde_json::Value,
    pub error: Option<String>,
    pub version: i64,
}

impl Execution {
    /// Move to `next`, rejecting transitions outside the table in §3.
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_can_start_or_cancel_directly() {
        assert!(ExecutionStatus::Pending.can_transition_to(ExecutionStatus::Started));
        assert!(ExecutionStatus::Pending.can_transition_to(ExecutionStatus::Cancelled));
        assert!(!ExecutionStatus::Pending.can_transition_to(ExecutionStatus::Succeeded));
    }

    #[test]
    fn started_may_go_to_any_of_four_states() {
        for next in [
            ExecutionStatus::Succeeded,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
            ExecutionStatus::Cancelling,
        ] {
            assert!(ExecutionStatus::Started.can_transition_to(next));
        }
    }

    #[test]
    fn end_states_are_terminal() {
        for end in [
            ExecutionStatus::Succeeded,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert!(end.is_end_state());
            assert!(!end.is_active());
        }
    }
}
