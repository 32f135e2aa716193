//! Copies shared events into the global store.

use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use tracing::{debug, error, info, warn};

use super::AggregateSequencer;
use crate::config::ForwarderConfig;
use crate::message::{EventMessage, ORIGIN_KEY};
use crate::storage::{EventStorage, Result, StorageError};
use crate::utils::retry::{is_retryable, replication_backoff};

/// Writes a module's shared events to the global store.
///
/// The global copy keeps the event's identifier, is stamped with the module's
/// origin, and is renumbered to follow the aggregate's last sequence number
/// in the global store. Renumbering for one aggregate is serialized through
/// the [`AggregateSequencer`]; sharing one sequencer between every replicator
/// of a process keeps concurrent modules from racing each other.
pub struct Replicator {
    origin: String,
    global: Arc<dyn EventStorage>,
    sequencer: Arc<AggregateSequencer>,
}

impl Replicator {
    pub fn new(
        origin: impl Into<String>,
        global: Arc<dyn EventStorage>,
        sequencer: Arc<AggregateSequencer>,
    ) -> Self {
        Self {
            origin: origin.into(),
            global,
            sequencer,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Replicates one event. Re-delivering an already replicated event is a
    /// no-op.
    pub async fn replicate(&self, event: EventMessage) -> Result<()> {
        let stamped = event.and_meta_data(ORIGIN_KEY, self.origin.as_str());
        let Some(aggregate_id) = stamped.aggregate_id().map(str::to_string) else {
            return self.global.publish(vec![stamped]).await;
        };

        let _guard = self.sequencer.lock(&aggregate_id).await;
        let sequence = self
            .global
            .last_sequence_number(&aggregate_id)
            .await?
            .map_or(0, |last| last + 1);

        debug!(
            origin = %self.origin,
            aggregate_id = %aggregate_id,
            sequence,
            "Replicating event to global store"
        );
        self.global
            .publish(vec![stamped.with_sequence(sequence)])
            .await
    }

    /// Replicates one event, retrying in backoff rounds until it is stored.
    ///
    /// Transient failures are retried within a round; once a round is
    /// exhausted, or on a permanent failure, the next round starts after
    /// the maximum backoff. The event is never skipped.
    pub async fn replicate_until_stored(&self, event: &EventMessage, config: &ForwarderConfig) {
        let mut round: u32 = 0;
        loop {
            round += 1;
            let result = (|| async { self.replicate(event.clone()).await })
                .retry(replication_backoff(config))
                .when(is_retryable)
                .notify(|err: &StorageError, dur: Duration| {
                    warn!(
                        origin = %self.origin,
                        event.id = %event.identifier,
                        error = %err,
                        delay = ?dur,
                        "Replication failed, retrying"
                    );
                })
                .await;

            match result {
                Ok(()) => {
                    if round > 1 {
                        info!(origin = %self.origin, event.id = %event.identifier, round, "Replication recovered");
                    }
                    return;
                }
                Err(e) => {
                    error!(
                        origin = %self.origin,
                        event.id = %event.identifier,
                        round,
                        error = %e,
                        "Replication round failed, pausing before next round"
                    );
                    tokio::time::sleep(config.max_backoff()).await;
                }
            }
        }
    }
}
