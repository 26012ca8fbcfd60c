//! Engine tuning knobs, following the same plain-struct-with-builder
//! convention as `durable::worker::poller::PollerConfig`.

use std::time::Duration;

/// Configures one [`super::WorkflowEngine`].
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// How long the scheduling loop sleeps between polls when the execution
    /// has not yet reached an end state (§4.5, default 100ms).
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
