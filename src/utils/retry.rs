//! Retry utilities: backoff builders and retryable error classification.
//!
//! Uses `backon` for exponential backoff with jitter.

use backon::ExponentialBuilder;

use crate::config::ForwarderConfig;
use crate::storage::StorageError;

/// Backoff for one round of replication retries into the global store.
///
/// Defaults:
/// - Min delay: 10ms
/// - Max delay: 2s
/// - Max attempts: 10
/// - Jitter enabled
pub fn replication_backoff(config: &ForwarderConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(config.min_backoff())
        .with_max_delay(config.max_backoff())
        .with_max_times(config.max_retries)
        .with_jitter()
}

/// Determines if a storage error may clear up on retry.
///
/// Retryable:
/// - `SequenceConflict`: a concurrent writer took the sequence number
/// - `Unavailable`: the store could not be reached
pub fn is_retryable(error: &StorageError) -> bool {
    error.is_transient()
}
