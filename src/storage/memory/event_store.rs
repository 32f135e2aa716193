//! In-memory EventStorage implementation.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, error};
use uuid::Uuid;

use super::stream::InMemoryEventStream;
use crate::message::EventMessage;
use crate::registration::{Registration, Subscribers};
use crate::storage::{DispatchInterceptor, EventProcessor, EventStorage, Result, StorageError};
use crate::stream::{BoxedStream, TrackedEvent, DEFAULT_POLL_INTERVAL};

#[derive(Default)]
pub(super) struct StoreState {
    /// Append log; an event's index is its stream position.
    pub(super) log: Vec<EventMessage>,
    identifiers: HashSet<Uuid>,
    /// Log indices per aggregate, in sequence order.
    aggregates: HashMap<String, Vec<usize>>,
    snapshots: HashMap<String, EventMessage>,
}

impl StoreState {
    fn next_sequence(&self, aggregate_id: &str) -> u64 {
        self.aggregates
            .get(aggregate_id)
            .and_then(|indices| indices.last())
            .and_then(|&index| self.log[index].sequence())
            .map_or(0, |sequence| sequence + 1)
    }

    fn append(&mut self, event: EventMessage) {
        let index = self.log.len();
        self.identifiers.insert(event.identifier);
        if let Some(aggregate_id) = event.aggregate_id() {
            self.aggregates
                .entry(aggregate_id.to_string())
                .or_default()
                .push(index);
        }
        self.log.push(event);
    }
}

/// Log shared between a store and the streams opened on it.
#[derive(Default)]
pub(super) struct SharedLog {
    state: RwLock<StoreState>,
    pub(super) appended: Notify,
}

impl SharedLog {
    pub(super) fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Event store that keeps everything in memory.
///
/// Publishing is atomic per batch: either every event of the batch is
/// appended or none is. Events whose identifier is already stored are
/// skipped, so replaying a batch is harmless.
pub struct InMemoryEventStore {
    name: String,
    log: Arc<SharedLog>,
    processors: Subscribers<dyn EventProcessor>,
    interceptors: Subscribers<dyn DispatchInterceptor>,
    fail_on_publish: AtomicBool,
    failures_remaining: AtomicU32,
    poll_interval: Duration,
}

impl InMemoryEventStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            log: Arc::new(SharedLog::default()),
            processors: Subscribers::new(),
            interceptors: Subscribers::new(),
            fail_on_publish: AtomicBool::new(false),
            failures_remaining: AtomicU32::new(0),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Upper bound on how long streams opened on this store sleep between
    /// checks for new events.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Makes every publish fail with `Unavailable` until reset.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `count` publishes fail with `Unavailable`.
    pub fn fail_next_publishes(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Every stored event in append order.
    pub fn all_events(&self) -> Vec<EventMessage> {
        self.log.read().log.clone()
    }

    pub fn len(&self) -> usize {
        self.log.read().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn should_fail(&self) -> bool {
        if self.fail_on_publish.load(Ordering::SeqCst) {
            return true;
        }
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Validates the batch against current state and returns the events to
    /// append, with already-stored identifiers removed.
    fn accept(state: &StoreState, events: Vec<EventMessage>) -> Result<Vec<EventMessage>> {
        let mut next_in_batch: HashMap<String, u64> = HashMap::new();
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut accepted = Vec::with_capacity(events.len());

        for event in events {
            if state.identifiers.contains(&event.identifier) || !seen.insert(event.identifier) {
                debug!(identifier = %event.identifier, "Skipping already stored event");
                continue;
            }
            if let Some(domain) = event.domain.as_ref() {
                let expected = next_in_batch
                    .get(&domain.aggregate_id)
                    .copied()
                    .unwrap_or_else(|| state.next_sequence(&domain.aggregate_id));
                if domain.sequence != expected {
                    return Err(StorageError::SequenceConflict {
                        aggregate_id: domain.aggregate_id.clone(),
                        expected,
                        actual: domain.sequence,
                    });
                }
                next_in_batch.insert(domain.aggregate_id.clone(), expected + 1);
            }
            accepted.push(event);
        }

        Ok(accepted)
    }

    fn notify_processors(&self, events: &[EventMessage]) {
        for processor in self.processors.snapshot() {
            if catch_unwind(AssertUnwindSafe(|| processor.process(events))).is_err() {
                error!(store = %self.name, "Event processor panicked");
            }
        }
    }
}

#[async_trait]
impl EventStorage for InMemoryEventStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, events: Vec<EventMessage>) -> Result<()> {
        if self.should_fail() {
            return Err(StorageError::Unavailable {
                store: self.name.clone(),
                reason: "publish failure injected".to_string(),
            });
        }

        let interceptors = self.interceptors.snapshot();
        let events: Vec<EventMessage> = events
            .into_iter()
            .map(|event| {
                interceptors
                    .iter()
                    .fold(event, |event, interceptor| interceptor.intercept(event))
            })
            .collect();

        let accepted = {
            let mut state = self.log.write();
            let accepted = Self::accept(&state, events)?;
            for event in &accepted {
                state.append(event.clone());
            }
            accepted
        };

        if accepted.is_empty() {
            return Ok(());
        }
        debug!(store = %self.name, count = accepted.len(), "Events appended");
        self.log.appended.notify_waiters();
        self.notify_processors(&accepted);
        Ok(())
    }

    async fn read_events_from(
        &self,
        aggregate_id: &str,
        first_sequence: u64,
    ) -> Result<Vec<EventMessage>> {
        let state = self.log.read();
        Ok(state
            .aggregates
            .get(aggregate_id)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&index| &state.log[index])
                    .filter(|event| event.sequence().is_some_and(|seq| seq >= first_sequence))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn last_sequence_number(&self, aggregate_id: &str) -> Result<Option<u64>> {
        let state = self.log.read();
        Ok(state
            .aggregates
            .get(aggregate_id)
            .and_then(|indices| indices.last())
            .and_then(|&index| state.log[index].sequence()))
    }

    async fn read_snapshot(&self, aggregate_id: &str) -> Result<Option<EventMessage>> {
        Ok(self.log.read().snapshots.get(aggregate_id).cloned())
    }

    async fn store_snapshot(&self, snapshot: EventMessage) -> Result<()> {
        let aggregate_id = snapshot
            .aggregate_id()
            .ok_or(StorageError::MissingAggregate)?
            .to_string();
        self.log.write().snapshots.insert(aggregate_id, snapshot);
        Ok(())
    }

    fn open_stream(&self, position: Option<u64>) -> Result<BoxedStream<TrackedEvent>> {
        let start = position.map_or(0, |position| position as usize + 1);
        Ok(Box::new(InMemoryEventStream::new(
            self.log.clone(),
            start,
            self.poll_interval,
        )))
    }

    fn subscribe(&self, processor: Arc<dyn EventProcessor>) -> Registration {
        self.processors.add(processor)
    }

    fn register_dispatch_interceptor(
        &self,
        interceptor: Arc<dyn DispatchInterceptor>,
    ) -> Registration {
        self.interceptors.add(interceptor)
    }
}
