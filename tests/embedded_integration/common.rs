//! Shared fixtures and helpers for embedded broker integration tests.

pub use std::sync::atomic::{AtomicUsize, Ordering};
pub use std::sync::Arc;
pub use std::time::Duration;

pub use serde_json::{json, Value};
pub use tokio::time::Instant;

pub use embedded_broker::config::{BrokerConfig, ModuleConfig, ReplicationMode};
pub use embedded_broker::message::{CommandMessage, EventMessage, QueryMessage};
pub use embedded_broker::registration::Registration;
pub use embedded_broker::replication::ModuleEventStore;
pub use embedded_broker::routing::{
    command_handler, query_handler, CommandError, HandlerError, QueryError, QueryHandler,
    RoutingError,
};
pub use embedded_broker::storage::{EventStorage, InMemoryEventStore};
pub use embedded_broker::stream::{BlockingStream, BoxedStream, TrackedEvent};
pub use embedded_broker::{EmbeddedBroker, Module};

/// Event types every test broker replicates.
pub const SHARED_TYPES: [&str; 2] = ["OrderPlaced", "OrderShipped"];

/// Broker with fast forwarder timings and the shared types above.
pub fn test_broker() -> EmbeddedBroker {
    let config = BrokerConfig {
        shared_event_types: SHARED_TYPES.iter().map(|t| t.to_string()).collect(),
        ..BrokerConfig::for_test()
    };
    EmbeddedBroker::in_memory(config)
}

/// Connects a module with a fresh in-memory local store.
pub async fn connect_local(broker: &EmbeddedBroker, name: &str, mode: ReplicationMode) -> Module {
    broker
        .connect(ModuleConfig::new(name).with_replication(mode), None)
        .await
        .expect("module should connect")
}

/// Connects a module that works on the global store directly.
pub async fn connect_global(broker: &EmbeddedBroker, name: &str) -> Module {
    broker
        .connect(ModuleConfig::global_only(name), None)
        .await
        .expect("module should connect")
}

/// Domain event of an `order` aggregate.
pub fn order_event(aggregate_id: &str, sequence: u64, event_type: &str) -> EventMessage {
    EventMessage::domain(
        "order",
        aggregate_id,
        sequence,
        event_type,
        json!({ "order_id": aggregate_id, "seq": sequence }),
    )
}

/// Five events for one order, two of them of a shared type.
pub fn order_lifecycle(aggregate_id: &str) -> Vec<EventMessage> {
    vec![
        order_event(aggregate_id, 0, "OrderCreated"),
        order_event(aggregate_id, 1, "OrderPlaced"),
        order_event(aggregate_id, 2, "ItemAdded"),
        order_event(aggregate_id, 3, "OrderShipped"),
        order_event(aggregate_id, 4, "NoteAdded"),
    ]
}

/// Consumes everything that becomes available within `quiet` of the last item.
pub async fn drain(stream: &mut BoxedStream<TrackedEvent>, quiet: Duration) -> Vec<EventMessage> {
    let mut events = Vec::new();
    while stream
        .has_next_available_within(quiet)
        .await
        .expect("stream should stay open")
    {
        let tracked = stream.next_available().await.expect("item was available");
        events.push(tracked.event);
    }
    events
}

/// Number of events the global store holds for `aggregate_id`.
pub async fn global_count(broker: &EmbeddedBroker, aggregate_id: &str) -> usize {
    broker
        .global_store()
        .read_events(aggregate_id)
        .await
        .map(|events| events.len())
        .unwrap_or(0)
}

/// Waits until the global store holds `expected` events for `aggregate_id`.
pub async fn wait_for_global_count(
    broker: &EmbeddedBroker,
    aggregate_id: &str,
    expected: usize,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if global_count(broker, aggregate_id).await == expected {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
