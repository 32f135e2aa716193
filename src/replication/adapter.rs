//! Event store adapter over a module-local store and the global store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{
    AggregateSequencer, ForwarderClaims, ForwarderConfig, ForwarderHandle, GlobalEventForwarder,
    ModuleEventStore, ReplicationMode, Replicator, Result, GLOBAL_SOURCE, LOCAL_SOURCE,
};
use crate::message::{EventMessage, SharedEventTypes};
use crate::registration::Registration;
use crate::storage::{DispatchInterceptor, EventProcessor, EventStorage, PositionStore, StorageError};
use crate::stream::{
    BoxedStream, FilteringStream, MergedStream, MergedToken, TrackedEvent, TrackingToken,
    DEFAULT_POLL_INTERVAL,
};

/// A module's view of its own event store plus the global one.
///
/// Every published event lands in the local store, which holds the module's
/// authoritative history. Events of a shared type are additionally copied to
/// the global store, stamped with the module's origin, either inside
/// `publish` or by a [`GlobalEventForwarder`], depending on the
/// [`ReplicationMode`]. In synchronous mode `publish` returns only once every
/// shared event is stored globally, retrying while the global store fails.
///
/// Reading merges both stores. With origin filtering on, events the module
/// itself replicated are hidden on the global side, since the module already
/// sees the local original.
pub struct LocalAndGlobalEventStore {
    origin: String,
    local: Arc<dyn EventStorage>,
    global: Arc<dyn EventStorage>,
    shared: SharedEventTypes,
    replicator: Arc<Replicator>,
    claims: Arc<ForwarderClaims>,
    replication: ReplicationMode,
    retry: ForwarderConfig,
    origin_filtering: bool,
    poll_interval: Duration,
}

impl LocalAndGlobalEventStore {
    pub fn new(
        origin: impl Into<String>,
        local: Arc<dyn EventStorage>,
        global: Arc<dyn EventStorage>,
        shared: SharedEventTypes,
    ) -> Self {
        let origin = origin.into();
        let replicator = Arc::new(Replicator::new(
            origin.clone(),
            global.clone(),
            Arc::new(AggregateSequencer::new()),
        ));
        Self {
            origin,
            local,
            global,
            shared,
            replicator,
            claims: Arc::new(ForwarderClaims::new()),
            replication: ReplicationMode::default(),
            retry: ForwarderConfig::default(),
            origin_filtering: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_replication(mut self, replication: ReplicationMode) -> Self {
        self.replication = replication;
        self
    }

    /// Backoff used when synchronous replication hits a failing global store.
    pub fn with_retry(mut self, retry: ForwarderConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_origin_filtering(mut self, origin_filtering: bool) -> Self {
        self.origin_filtering = origin_filtering;
        self
    }

    /// Wake-up granularity of merged streams.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Serializes replication through a sequencer shared with other modules.
    pub fn with_sequencer(mut self, sequencer: Arc<AggregateSequencer>) -> Self {
        self.replicator = Arc::new(Replicator::new(
            self.origin.clone(),
            self.global.clone(),
            sequencer,
        ));
        self
    }

    /// Registers forwarders in a claim table shared with other modules.
    pub fn with_forwarder_claims(mut self, claims: Arc<ForwarderClaims>) -> Self {
        self.claims = claims;
        self
    }

    pub fn local(&self) -> &Arc<dyn EventStorage> {
        &self.local
    }

    pub fn global(&self) -> &Arc<dyn EventStorage> {
        &self.global
    }

    pub fn replication(&self) -> ReplicationMode {
        self.replication
    }

    pub fn is_forwarder_running(&self) -> bool {
        self.claims.is_running(&self.origin)
    }

    /// Starts the background forwarder for this module.
    pub async fn start_forwarder(
        &self,
        positions: Arc<dyn PositionStore>,
        config: ForwarderConfig,
    ) -> Result<ForwarderHandle> {
        GlobalEventForwarder::new(
            self.local.clone(),
            self.replicator.clone(),
            self.shared.clone(),
            positions,
            config,
        )
        .start(&self.claims)
        .await
    }

    /// Global events that are not copies of this module's own history.
    fn foreign(&self, events: Vec<EventMessage>) -> impl Iterator<Item = EventMessage> + '_ {
        events
            .into_iter()
            .filter(move |event| event.origin() != Some(self.origin.as_str()))
    }
}

#[async_trait]
impl ModuleEventStore for LocalAndGlobalEventStore {
    fn origin(&self) -> &str {
        &self.origin
    }

    async fn publish(&self, events: Vec<EventMessage>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let shared: Vec<EventMessage> = match self.replication {
            ReplicationMode::Synchronous => events
                .iter()
                .filter(|event| self.shared.is_shared_event(event))
                .cloned()
                .collect(),
            ReplicationMode::Forwarded => Vec::new(),
        };

        debug!(
            origin = %self.origin,
            count = events.len(),
            replicated = shared.len(),
            "Publishing events"
        );
        self.local.publish(events).await?;
        for event in &shared {
            self.replicator.replicate_until_stored(event, &self.retry).await;
        }
        Ok(())
    }

    fn open_stream(&self, token: Option<TrackingToken>) -> Result<BoxedStream<TrackedEvent>> {
        let token = match token {
            None => MergedToken::new(),
            Some(TrackingToken::Merged(token)) => token,
            Some(other) => return Err(StorageError::IncompatibleToken(other).into()),
        };

        let global = self.global.open_stream(token.position(GLOBAL_SOURCE))?;
        let local = self.local.open_stream(token.position(LOCAL_SOURCE))?;
        let merged = MergedStream::new(
            vec![
                (GLOBAL_SOURCE.to_string(), global),
                (LOCAL_SOURCE.to_string(), local),
            ],
            token,
            self.poll_interval,
        );

        if !self.origin_filtering {
            return Ok(Box::new(merged));
        }
        let origin = self.origin.clone();
        Ok(Box::new(FilteringStream::new(
            Box::new(merged),
            move |tracked: &TrackedEvent| tracked.event.origin() != Some(origin.as_str()),
        )))
    }

    async fn read_events(&self, aggregate_id: &str) -> Result<Vec<EventMessage>> {
        let mut events = self.local.read_events(aggregate_id).await?;
        let global = self.global.read_events(aggregate_id).await?;
        events.extend(self.foreign(global));
        Ok(events)
    }

    async fn read_events_from(
        &self,
        aggregate_id: &str,
        first_sequence: u64,
    ) -> Result<Vec<EventMessage>> {
        let mut events = self
            .local
            .read_events_from(aggregate_id, first_sequence)
            .await?;
        let global = self
            .global
            .read_events_from(aggregate_id, first_sequence)
            .await?;
        events.extend(self.foreign(global));
        Ok(events)
    }

    async fn read_snapshot(&self, aggregate_id: &str) -> Result<Option<EventMessage>> {
        if let Some(snapshot) = self.local.read_snapshot(aggregate_id).await? {
            return Ok(Some(snapshot));
        }
        Ok(self.global.read_snapshot(aggregate_id).await?)
    }

    async fn store_snapshot(&self, snapshot: EventMessage) -> Result<()> {
        self.local.store_snapshot(snapshot.clone()).await?;
        self.global.store_snapshot(snapshot).await?;
        Ok(())
    }

    fn subscribe(&self, processor: Arc<dyn EventProcessor>) -> Registration {
        let local = self.local.subscribe(processor.clone());

        let origin = self.origin.clone();
        let origin_filtering = self.origin_filtering;
        let global_processor: Arc<dyn EventProcessor> =
            Arc::new(move |events: &[EventMessage]| {
                if !origin_filtering {
                    processor.process(events);
                    return;
                }
                let foreign: Vec<EventMessage> = events
                    .iter()
                    .filter(|event| event.origin() != Some(origin.as_str()))
                    .cloned()
                    .collect();
                if !foreign.is_empty() {
                    processor.process(&foreign);
                }
            });
        let global = self.global.subscribe(global_processor);

        Registration::all([local, global])
    }

    fn register_dispatch_interceptor(
        &self,
        interceptor: Arc<dyn DispatchInterceptor>,
    ) -> Registration {
        Registration::all([
            self.local.register_dispatch_interceptor(interceptor.clone()),
            self.global.register_dispatch_interceptor(interceptor),
        ])
    }
}
