//! Bounded-wait helpers for executor teardown.
//!
//! ARIA has no per-task wall-clock timeout at the engine layer — tasks
//! retry on their own `due_at` schedule. The one place a timeout budget is
//! actually needed is tearing down the subprocess executor: waiting for the
//! listener thread to join and for a killed child to be reaped must not
//! hang the engine forever.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from a bounded wait.
#[derive(Debug, Error)]
pub enum TimeoutError {
    #[error("operation timed out after {0:?}")]
    Elapsed(Duration),
}

/// Timeout budgets for subprocess executor teardown.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Bound on `close()`'s join of the listener thread.
    #[serde(with = "duration_millis")]
    pub close: Duration,
    /// Bound on `terminate()`'s wait for the killed child to exit.
    #[serde(with = "duration_millis")]
    pub terminate: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            close: Duration::from_secs(60),
            terminate: Duration::from_secs(60),
        }
    }
}

impl TimeoutConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_close(mut self, timeout: Duration) -> Self {
        self.close = timeout;
        self
    }

    pub fn with_terminate(mut self, timeout: Duration) -> Self {
        self.terminate = timeout;
        self
    }
}

/// Run `fut` to completion, or give up after `duration`.
pub async fn bounded<F, T>(duration: Duration, fut: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| TimeoutError::Elapsed(duration))
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
