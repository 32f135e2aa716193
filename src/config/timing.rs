//! Timing configuration for streams, queries and the replication forwarder.

use std::time::Duration;

use serde::Deserialize;

/// Stream wait configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamsConfig {
    /// Longest a waiting stream reader sleeps before re-checking, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
        }
    }
}

impl StreamsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Query routing configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueriesConfig {
    /// Deadline used by scatter-gather queries that do not pass their own.
    pub scatter_gather_timeout_ms: u64,
}

impl Default for QueriesConfig {
    fn default() -> Self {
        Self {
            scatter_gather_timeout_ms: 1000,
        }
    }
}

impl QueriesConfig {
    pub fn scatter_gather_timeout(&self) -> Duration {
        Duration::from_millis(self.scatter_gather_timeout_ms)
    }
}

/// Replication forwarder configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// How long the forwarder waits on the local stream per iteration.
    pub poll_timeout_ms: u64,
    /// First retry delay after a failed global write.
    pub min_backoff_ms: u64,
    /// Retry delay cap.
    pub max_backoff_ms: u64,
    /// Retries per backoff round. Rounds repeat until the write succeeds.
    pub max_retries: usize,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 250,
            min_backoff_ms: 10,
            max_backoff_ms: 2000,
            max_retries: 10,
        }
    }
}

impl ForwarderConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn min_backoff(&self) -> Duration {
        Duration::from_millis(self.min_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.min_backoff_ms))
    }

    /// Config with short delays for tests.
    pub fn for_test() -> Self {
        Self {
            poll_timeout_ms: 20,
            min_backoff_ms: 1,
            max_backoff_ms: 20,
            max_retries: 5,
        }
    }
}
