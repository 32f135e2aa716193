//! Merged, origin-filtered event streams as seen by modules.

use crate::common::*;

const QUIET: Duration = Duration::from_millis(100);

#[tokio::test]
async fn test_producer_sees_own_shared_event_once() {
    let broker = test_broker();
    let x = connect_local(&broker, "x", ReplicationMode::Forwarded).await;
    let mut stream = x.events().open_stream(None).unwrap();

    x.events()
        .publish(vec![order_event("o-1", 0, "OrderPlaced")])
        .await
        .unwrap();
    assert!(wait_for_global_count(&broker, "o-1", 1, Duration::from_secs(3)).await);

    let seen = drain(&mut stream, QUIET).await;
    assert_eq!(seen.len(), 1);
    assert!(seen[0].origin().is_none());

    x.shutdown().await;
}

#[tokio::test]
async fn test_other_module_sees_shared_event_once() {
    let broker = test_broker();
    let x = connect_local(&broker, "x", ReplicationMode::Forwarded).await;
    let y = connect_local(&broker, "y", ReplicationMode::Forwarded).await;
    let mut stream = y.events().open_stream(None).unwrap();

    x.events()
        .publish(vec![
            order_event("o-1", 0, "OrderCreated"),
            order_event("o-1", 1, "OrderPlaced"),
        ])
        .await
        .unwrap();

    let first = stream.next_available().await.unwrap();
    assert_eq!(first.event.event_type, "OrderPlaced");
    assert_eq!(first.event.origin(), Some("x"));
    assert!(drain(&mut stream, QUIET).await.is_empty());

    x.shutdown().await;
    y.shutdown().await;
}

#[tokio::test]
async fn test_unfiltered_module_sees_both_copies() {
    let broker = test_broker();
    let x = broker
        .connect(
            ModuleConfig::new("x")
                .with_replication(ReplicationMode::Synchronous)
                .with_origin_filtering(false),
            None,
        )
        .await
        .unwrap();
    let mut stream = x.events().open_stream(None).unwrap();

    x.events()
        .publish(vec![order_event("o-1", 0, "OrderPlaced")])
        .await
        .unwrap();

    let seen = drain(&mut stream, QUIET).await;
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].identifier, seen[1].identifier);
}

#[tokio::test]
async fn test_reopened_stream_continues_after_token() {
    let broker = test_broker();
    let x = connect_local(&broker, "x", ReplicationMode::Synchronous).await;
    x.events().publish(order_lifecycle("o-1")).await.unwrap();

    let mut stream = x.events().open_stream(None).unwrap();
    let mut consumed = Vec::new();
    for _ in 0..3 {
        consumed.push(stream.next_available().await.unwrap());
    }
    stream.close();
    let token = consumed.last().map(|t| t.token.clone());

    let mut resumed = x.events().open_stream(token).unwrap();
    let rest = drain(&mut resumed, QUIET).await;

    let types: Vec<_> = rest.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types, vec!["OrderShipped", "NoteAdded"]);
}

#[tokio::test]
async fn test_interrupted_wait_reports_nothing_available() {
    let broker = test_broker();
    let x = connect_local(&broker, "x", ReplicationMode::Synchronous).await;
    let mut stream = x.events().open_stream(None).unwrap();
    let control = stream.control();

    let waiter = tokio::spawn(async move {
        let started = Instant::now();
        let available = stream
            .has_next_available_within(Duration::from_secs(10))
            .await;
        (available, started.elapsed(), stream)
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    control.interrupt();

    let (available, elapsed, mut stream) = waiter.await.unwrap();
    assert_eq!(available, Ok(false));
    assert!(elapsed < Duration::from_secs(2));

    // Still usable afterwards.
    x.events()
        .publish(vec![order_event("o-1", 0, "OrderCreated")])
        .await
        .unwrap();
    assert!(stream
        .has_next_available_within(Duration::from_secs(1))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_close_wakes_blocked_reader() {
    let broker = test_broker();
    let x = connect_local(&broker, "x", ReplicationMode::Synchronous).await;
    let mut stream = x.events().open_stream(None).unwrap();
    let control = stream.control();

    let reader = tokio::spawn(async move { stream.next_available().await.map(|t| t.event) });
    tokio::time::sleep(Duration::from_millis(50)).await;
    control.close();

    let result = tokio::time::timeout(Duration::from_secs(2), reader)
        .await
        .expect("blocked reader should return promptly")
        .unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_pushed_batches_skip_own_replicas() {
    let broker = test_broker();
    let x = connect_local(&broker, "x", ReplicationMode::Synchronous).await;
    let y = connect_global(&broker, "y").await;
    let seen_by_x = Arc::new(AtomicUsize::new(0));
    let seen_by_y = Arc::new(AtomicUsize::new(0));
    let (cx, cy) = (seen_by_x.clone(), seen_by_y.clone());

    let rx = x.events().subscribe(Arc::new(move |events: &[EventMessage]| {
        cx.fetch_add(events.len(), Ordering::SeqCst);
    }));
    let ry = y.events().subscribe(Arc::new(move |events: &[EventMessage]| {
        cy.fetch_add(events.len(), Ordering::SeqCst);
    }));

    x.events().publish(order_lifecycle("o-1")).await.unwrap();

    assert_eq!(seen_by_x.load(Ordering::SeqCst), 5);
    assert_eq!(seen_by_y.load(Ordering::SeqCst), 2);
    assert!(rx.cancel());
    assert!(ry.cancel());
}
