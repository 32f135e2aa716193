//! Persistence collaborators.
//!
//! The broker treats every event store as an opaque append-only log keyed
//! by aggregate identifier and global position. These traits are the
//! contract the core consumes; [`memory`] provides in-process
//! implementations.

use std::sync::Arc;

use async_trait::async_trait;

use crate::message::EventMessage;
use crate::registration::Registration;
use crate::stream::{BoxedStream, TrackedEvent, TrackingToken};

pub mod memory;

pub use memory::{InMemoryEventStore, InMemoryPositionStore};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("Sequence conflict for aggregate {aggregate_id}: expected {expected}, got {actual}")]
    SequenceConflict {
        aggregate_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Snapshot has no aggregate identifier")]
    MissingAggregate,

    #[error("Tracking token not supported by this store: {0:?}")]
    IncompatibleToken(TrackingToken),

    #[error("Store '{store}' unavailable: {reason}")]
    Unavailable { store: String, reason: String },
}

impl StorageError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::SequenceConflict { .. } | StorageError::Unavailable { .. }
        )
    }
}

/// Receives every batch published to a store after it was appended.
pub trait EventProcessor: Send + Sync {
    fn process(&self, events: &[EventMessage]);
}

impl<F> EventProcessor for F
where
    F: Fn(&[EventMessage]) + Send + Sync,
{
    fn process(&self, events: &[EventMessage]) {
        self(events)
    }
}

/// Transforms events on their way into a store.
pub trait DispatchInterceptor: Send + Sync {
    fn intercept(&self, event: EventMessage) -> EventMessage;
}

impl<F> DispatchInterceptor for F
where
    F: Fn(EventMessage) -> EventMessage + Send + Sync,
{
    fn intercept(&self, event: EventMessage) -> EventMessage {
        self(event)
    }
}

/// Interface for event persistence.
///
/// Domain events are keyed by the unique `(aggregate_id, sequence)` pair;
/// sequence numbers per aggregate are gap-free within one store. Every
/// stored event also has a position in the store's append log, which is
/// what [`TrackingToken::Position`] refers to.
///
/// Implementations:
/// - `InMemoryEventStore`: in-process storage
#[async_trait]
pub trait EventStorage: Send + Sync {
    /// Name used in logs and as the source name in merged streams.
    fn name(&self) -> &str;

    /// Append a batch atomically.
    async fn publish(&self, events: Vec<EventMessage>) -> Result<()>;

    /// Retrieve all events for an aggregate.
    async fn read_events(&self, aggregate_id: &str) -> Result<Vec<EventMessage>> {
        self.read_events_from(aggregate_id, 0).await
    }

    /// Retrieve events for an aggregate from sequence `first_sequence` onwards.
    async fn read_events_from(
        &self,
        aggregate_id: &str,
        first_sequence: u64,
    ) -> Result<Vec<EventMessage>>;

    /// Highest stored sequence number for an aggregate.
    async fn last_sequence_number(&self, aggregate_id: &str) -> Result<Option<u64>>;

    /// Latest snapshot for an aggregate.
    async fn read_snapshot(&self, aggregate_id: &str) -> Result<Option<EventMessage>>;

    /// Store a snapshot, replacing any previous one for the same aggregate.
    async fn store_snapshot(&self, snapshot: EventMessage) -> Result<()>;

    /// Open a live stream over the append log, after `position`.
    ///
    /// `None` starts from the first event.
    fn open_stream(&self, position: Option<u64>) -> Result<BoxedStream<TrackedEvent>>;

    /// Deliver every future published batch to `processor`.
    fn subscribe(&self, processor: Arc<dyn EventProcessor>) -> Registration;

    /// Apply `interceptor` to every future published event.
    fn register_dispatch_interceptor(&self, interceptor: Arc<dyn DispatchInterceptor>)
        -> Registration;
}

/// Interface for checkpointing tracking processes.
///
/// Stores the token of the last event a named process has fully handled,
/// so the process can resume after a restart without gaps or reprocessing.
///
/// Implementations:
/// - `InMemoryPositionStore`: in-process storage
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Last saved token for `process`. `None` if never saved.
    async fn load_position(&self, process: &str) -> Result<Option<TrackingToken>>;

    /// Save the token for `process`, replacing the previous one.
    async fn save_position(&self, process: &str, token: TrackingToken) -> Result<()>;
}
