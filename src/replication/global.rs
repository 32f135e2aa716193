//! Direct view of the global store for modules without a local one.

use std::sync::Arc;

use async_trait::async_trait;

use super::{ModuleEventStore, Result};
use crate::message::EventMessage;
use crate::registration::Registration;
use crate::storage::{DispatchInterceptor, EventProcessor, EventStorage, StorageError};
use crate::stream::{BoxedStream, TrackedEvent, TrackingToken};

/// Publishes to and reads from the global store as-is.
///
/// Events are neither stamped with an origin nor origin-filtered: without a
/// local store there is no second copy to hide.
pub struct GlobalEventStore {
    origin: String,
    global: Arc<dyn EventStorage>,
}

impl GlobalEventStore {
    pub fn new(origin: impl Into<String>, global: Arc<dyn EventStorage>) -> Self {
        Self {
            origin: origin.into(),
            global,
        }
    }
}

#[async_trait]
impl ModuleEventStore for GlobalEventStore {
    fn origin(&self) -> &str {
        &self.origin
    }

    async fn publish(&self, events: Vec<EventMessage>) -> Result<()> {
        Ok(self.global.publish(events).await?)
    }

    fn open_stream(&self, token: Option<TrackingToken>) -> Result<BoxedStream<TrackedEvent>> {
        let position = match token {
            None => None,
            Some(TrackingToken::Position(position)) => Some(position),
            Some(other) => return Err(StorageError::IncompatibleToken(other).into()),
        };
        Ok(self.global.open_stream(position)?)
    }

    async fn read_events(&self, aggregate_id: &str) -> Result<Vec<EventMessage>> {
        Ok(self.global.read_events(aggregate_id).await?)
    }

    async fn read_events_from(
        &self,
        aggregate_id: &str,
        first_sequence: u64,
    ) -> Result<Vec<EventMessage>> {
        Ok(self
            .global
            .read_events_from(aggregate_id, first_sequence)
            .await?)
    }

    async fn read_snapshot(&self, aggregate_id: &str) -> Result<Option<EventMessage>> {
        Ok(self.global.read_snapshot(aggregate_id).await?)
    }

    async fn store_snapshot(&self, snapshot: EventMessage) -> Result<()> {
        Ok(self.global.store_snapshot(snapshot).await?)
    }

    fn subscribe(&self, processor: Arc<dyn EventProcessor>) -> Registration {
        self.global.subscribe(processor)
    }

    fn register_dispatch_interceptor(
        &self,
        interceptor: Arc<dyn DispatchInterceptor>,
    ) -> Registration {
        self.global.register_dispatch_interceptor(interceptor)
    }
}
