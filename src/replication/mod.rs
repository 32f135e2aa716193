//! Local/global event store replication.
//!
//! Every module sees events through a [`ModuleEventStore`]. A module with its
//! own store uses [`LocalAndGlobalEventStore`], which keeps the module's
//! history local and copies shared event types into the process-wide global
//! store. A module without one uses [`GlobalEventStore`] directly.
//!
//! This module contains:
//! - [`AggregateSequencer`]: serializes replication per aggregate
//! - [`Replicator`]: origin stamping and global re-sequencing
//! - [`GlobalEventForwarder`]: background tail of the local store
//! - [`ForwarderClaims`]: at most one forwarder per origin

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::message::EventMessage;
use crate::registration::Registration;
use crate::storage::{DispatchInterceptor, EventProcessor, StorageError};
use crate::stream::{BoxedStream, TrackedEvent, TrackingToken};

mod adapter;
mod forwarder;
mod global;
mod replicator;
mod sequencer;

pub use crate::config::{ForwarderConfig, ReplicationMode};
pub use adapter::LocalAndGlobalEventStore;
pub use forwarder::{ForwarderClaims, ForwarderHandle, GlobalEventForwarder};
pub use global::GlobalEventStore;
pub use replicator::Replicator;
pub use sequencer::AggregateSequencer;

/// Source name of the global store inside merged streams and tokens.
pub const GLOBAL_SOURCE: &str = "global";
/// Source name of the local store inside merged streams and tokens.
pub const LOCAL_SOURCE: &str = "local";

/// Result type for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur in the replication layer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReplicationError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("A forwarder for origin '{origin}' is already running")]
    ForwarderAlreadyRunning { origin: String },
}

/// An aggregate's latest snapshot plus the events recorded after it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateHistory {
    pub snapshot: Option<EventMessage>,
    pub events: Vec<EventMessage>,
}

/// The event store a module publishes to and reads from.
#[async_trait]
pub trait ModuleEventStore: Send + Sync {
    /// Identity of the module, stamped as origin on replicated events.
    fn origin(&self) -> &str;

    async fn publish(&self, events: Vec<EventMessage>) -> Result<()>;

    /// Live stream over everything the module can see, after `token`.
    fn open_stream(&self, token: Option<TrackingToken>) -> Result<BoxedStream<TrackedEvent>>;

    /// History of an aggregate, for reconstruction.
    async fn read_events(&self, aggregate_id: &str) -> Result<Vec<EventMessage>>;

    /// History of an aggregate from `first_sequence` onwards.
    async fn read_events_from(
        &self,
        aggregate_id: &str,
        first_sequence: u64,
    ) -> Result<Vec<EventMessage>>;

    async fn read_snapshot(&self, aggregate_id: &str) -> Result<Option<EventMessage>>;

    async fn store_snapshot(&self, snapshot: EventMessage) -> Result<()>;

    /// Push delivery of every future batch the module can see.
    fn subscribe(&self, processor: Arc<dyn EventProcessor>) -> Registration;

    fn register_dispatch_interceptor(&self, interceptor: Arc<dyn DispatchInterceptor>)
        -> Registration;

    /// Latest snapshot and the events after it.
    ///
    /// A failing snapshot read falls back to replaying the full history.
    async fn read_aggregate(&self, aggregate_id: &str) -> Result<AggregateHistory> {
        let snapshot = match self.read_snapshot(aggregate_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    origin = %self.origin(),
                    aggregate_id = %aggregate_id,
                    error = %e,
                    "Snapshot read failed, replaying full history"
                );
                None
            }
        };

        let events = match snapshot.as_ref().and_then(EventMessage::sequence) {
            Some(sequence) => self.read_events_from(aggregate_id, sequence + 1).await?,
            None => self.read_events(aggregate_id).await?,
        };

        Ok(AggregateHistory { snapshot, events })
    }
}
