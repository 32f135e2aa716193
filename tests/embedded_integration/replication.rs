//! Replication of shared events from module-local stores to the global store.

use embedded_broker::replication::ReplicationError;
use embedded_broker::storage::StorageError;

use crate::common::*;

/// Appends `count` shared events to `aggregate_id` in the module's local
/// store, retrying on sequence conflicts with concurrent writers.
async fn publish_concurrently(module: Arc<Module>, aggregate_id: &'static str, count: usize) {
    for _ in 0..count {
        loop {
            let next = module
                .events()
                .read_events(aggregate_id)
                .await
                .unwrap()
                .iter()
                .filter(|event| event.origin().is_none())
                .count() as u64;
            match module
                .events()
                .publish(vec![order_event(aggregate_id, next, "OrderPlaced")])
                .await
            {
                Ok(()) => break,
                Err(ReplicationError::Storage(StorageError::SequenceConflict { .. })) => {
                    tokio::task::yield_now().await
                }
                Err(e) => panic!("unexpected publish failure: {e}"),
            }
        }
    }
}

#[tokio::test]
async fn test_only_shared_events_reach_global_store() {
    let broker = test_broker();
    let orders = connect_local(&broker, "orders", ReplicationMode::Forwarded).await;

    orders.events().publish(order_lifecycle("o-1")).await.unwrap();

    assert!(wait_for_global_count(&broker, "o-1", 2, Duration::from_secs(3)).await);
    let global = broker.global_store().read_events("o-1").await.unwrap();
    let types: Vec<_> = global.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types, vec!["OrderPlaced", "OrderShipped"]);
    assert!(global.iter().all(|e| e.origin() == Some("orders")));
    let sequences: Vec<_> = global.iter().filter_map(EventMessage::sequence).collect();
    assert_eq!(sequences, vec![0, 1]);
    assert_eq!(orders.events().read_events("o-1").await.unwrap().len(), 5);

    orders.shutdown().await;
}

#[tokio::test]
async fn test_synchronous_replication_is_visible_on_return() {
    let broker = test_broker();
    let orders = connect_local(&broker, "orders", ReplicationMode::Synchronous).await;

    orders.events().publish(order_lifecycle("o-1")).await.unwrap();

    assert_eq!(global_count(&broker, "o-1").await, 2);
}

#[tokio::test]
async fn test_module_without_local_store_reads_replicated_events() {
    let broker = test_broker();
    let orders = connect_local(&broker, "orders", ReplicationMode::Forwarded).await;
    let reporting = connect_global(&broker, "reporting").await;

    orders.events().publish(order_lifecycle("o-1")).await.unwrap();
    assert!(wait_for_global_count(&broker, "o-1", 2, Duration::from_secs(3)).await);

    let seen = reporting.events().read_events("o-1").await.unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|e| e.origin() == Some("orders")));

    orders.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_producers_get_gap_free_global_sequence() {
    let broker = test_broker();
    let x = Arc::new(connect_local(&broker, "x", ReplicationMode::Forwarded).await);
    let y = Arc::new(connect_local(&broker, "y", ReplicationMode::Forwarded).await);

    let producers = vec![
        tokio::spawn(publish_concurrently(x.clone(), "o-1", 25)),
        tokio::spawn(publish_concurrently(x.clone(), "o-1", 25)),
        tokio::spawn(publish_concurrently(y.clone(), "o-1", 25)),
        tokio::spawn(publish_concurrently(y.clone(), "o-1", 25)),
    ];
    for producer in producers {
        producer.await.unwrap();
    }

    assert!(wait_for_global_count(&broker, "o-1", 100, Duration::from_secs(10)).await);
    let sequences: Vec<u64> = broker
        .global_store()
        .read_events("o-1")
        .await
        .unwrap()
        .iter()
        .filter_map(EventMessage::sequence)
        .collect();
    assert_eq!(sequences, (0..100).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_forwarder_resumes_after_reconnect() {
    let broker = test_broker();
    let local = Arc::new(InMemoryEventStore::new("orders-db"));
    let storage: Arc<dyn EventStorage> = local.clone();

    let orders = broker
        .connect(ModuleConfig::new("orders"), Some(storage.clone()))
        .await
        .unwrap();
    orders
        .events()
        .publish(vec![order_event("o-1", 0, "OrderPlaced")])
        .await
        .unwrap();
    assert!(wait_for_global_count(&broker, "o-1", 1, Duration::from_secs(3)).await);
    orders.shutdown().await;

    // Written while no forwarder runs.
    local
        .publish(vec![order_event("o-1", 1, "OrderShipped")])
        .await
        .unwrap();

    let orders = broker
        .connect(ModuleConfig::new("orders"), Some(storage))
        .await
        .unwrap();
    assert!(wait_for_global_count(&broker, "o-1", 2, Duration::from_secs(3)).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(global_count(&broker, "o-1").await, 2);

    orders.shutdown().await;
}

#[tokio::test]
async fn test_forwarder_waits_out_global_outage() {
    let global = Arc::new(InMemoryEventStore::new("global"));
    let config = BrokerConfig {
        shared_event_types: SHARED_TYPES.iter().map(|t| t.to_string()).collect(),
        ..BrokerConfig::for_test()
    };
    let broker = EmbeddedBroker::new(config, global.clone());
    let orders = connect_local(&broker, "orders", ReplicationMode::Forwarded).await;

    global.set_fail_on_publish(true);
    orders
        .events()
        .publish(vec![order_event("o-1", 0, "OrderPlaced")])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(global.is_empty());
    assert!(orders.is_forwarding());

    global.set_fail_on_publish(false);
    assert!(wait_for_global_count(&broker, "o-1", 1, Duration::from_secs(3)).await);

    orders.shutdown().await;
}

#[tokio::test]
async fn test_snapshot_shortens_aggregate_replay() {
    let broker = test_broker();
    let orders = connect_local(&broker, "orders", ReplicationMode::Synchronous).await;
    orders.events().publish(order_lifecycle("o-1")).await.unwrap();
    orders
        .events()
        .store_snapshot(order_event("o-1", 3, "OrderSnapshot"))
        .await
        .unwrap();

    let history = orders.events().read_aggregate("o-1").await.unwrap();

    assert_eq!(history.snapshot.and_then(|s| s.sequence()), Some(3));
    let types: Vec<_> = history.events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types, vec!["NoteAdded"]);
    assert!(broker.global_store().read_snapshot("o-1").await.unwrap().is_some());
}
