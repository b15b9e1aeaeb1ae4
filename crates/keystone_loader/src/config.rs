use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning for the boot queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    /// How many readiness polls an entry gets before the queue moves on
    pub max_readiness_polls: u32,
    /// Poll interval for entries that did not set their own
    pub default_poll_interval_ms: Option<u64>,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            max_readiness_polls: 100,
            default_poll_interval_ms: None,
        }
    }
}

impl BootConfig {
    /// The configured default poll interval, never shorter than 1 ms.
    pub fn default_poll_interval(&self) -> Option<Duration> {
        self.default_poll_interval_ms
            .map(|ms| Duration::from_millis(ms.max(1)))
    }
}
