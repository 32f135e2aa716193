//! Direct and scatter-gather queries across modules.

use futures::StreamExt;

use crate::common::*;

/// Answers `answer` after `delay`, or never when `delay` is `None`.
fn delayed_answer(delay: Option<Duration>, answer: Value) -> Arc<dyn QueryHandler> {
    query_handler(move |_| {
        let answer = answer.clone();
        async move {
            match delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
            Ok::<_, HandlerError>(answer)
        }
    })
}

#[tokio::test]
async fn test_direct_query_with_single_answerer() {
    let broker = test_broker();
    let inventory = connect_global(&broker, "inventory").await;
    let orders = connect_global(&broker, "orders").await;
    inventory.queries().subscribe(
        "StockLevel",
        query_handler(|query| async move {
            Ok::<_, HandlerError>(json!({ "sku": query.payload["sku"], "level": 7 }))
        }),
    );

    let answer = orders
        .queries()
        .query(QueryMessage::new("StockLevel", json!({ "sku": "A-1" })))
        .await
        .unwrap();

    assert_eq!(answer, json!({ "sku": "A-1", "level": 7 }));
}

#[tokio::test]
async fn test_direct_query_with_several_answerers_is_ambiguous() {
    let broker = test_broker();
    let east = connect_global(&broker, "east").await;
    let west = connect_global(&broker, "west").await;
    for module in [&east, &west] {
        module.queries().subscribe(
            "StockLevel",
            query_handler(|_| async { Ok::<_, HandlerError>(json!(1)) }),
        );
    }

    let result = east
        .queries()
        .query(QueryMessage::new("StockLevel", json!({})))
        .await;

    assert!(matches!(
        result,
        Err(QueryError::AmbiguousHandler { count: 2, .. })
    ));
}

#[tokio::test]
async fn test_query_without_answerer() {
    let broker = test_broker();
    let orders = connect_global(&broker, "orders").await;

    let result = orders
        .queries()
        .query(QueryMessage::new("StockLevel", json!({})))
        .await;

    assert!(matches!(result, Err(QueryError::NoHandler { name }) if name == "StockLevel"));
    let gathered = orders
        .queries()
        .scatter_gather(QueryMessage::new("StockLevel", json!({})))
        .collect()
        .await;
    assert!(gathered.is_empty());
}

#[tokio::test]
async fn test_scatter_gather_returns_answers_within_deadline() {
    let broker = test_broker();
    let a = connect_global(&broker, "a").await;
    let b = connect_global(&broker, "b").await;
    let c = connect_global(&broker, "c").await;
    a.queries().subscribe(
        "Quote",
        delayed_answer(Some(Duration::from_millis(10)), json!("a")),
    );
    b.queries().subscribe(
        "Quote",
        delayed_answer(Some(Duration::from_millis(50)), json!("b")),
    );
    c.queries().subscribe("Quote", delayed_answer(None, json!("c")));

    let started = Instant::now();
    let answers = a
        .queries()
        .scatter_gather_within(
            QueryMessage::new("Quote", json!({})),
            Duration::from_millis(200),
        )
        .collect()
        .await;
    let elapsed = started.elapsed();

    assert_eq!(answers, vec![json!("a"), json!("b")]);
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn test_scatter_gather_skips_failing_answerers() {
    let broker = test_broker();
    let a = connect_global(&broker, "a").await;
    let b = connect_global(&broker, "b").await;
    a.queries().subscribe(
        "Quote",
        query_handler(|_| async { Err::<Value, _>(HandlerError::new("no quote")) }),
    );
    b.queries().subscribe(
        "Quote",
        query_handler(|_| async { Ok::<_, HandlerError>(json!(42)) }),
    );

    let answers: Vec<Value> = a
        .queries()
        .scatter_gather_within(QueryMessage::new("Quote", json!({})), Duration::from_secs(1))
        .into_stream()
        .collect()
        .await;

    assert_eq!(answers, vec![json!(42)]);
}

#[tokio::test]
async fn test_withdrawn_answerer_no_longer_consulted() {
    let broker = test_broker();
    let a = connect_global(&broker, "a").await;
    let b = connect_global(&broker, "b").await;
    let registration = a.queries().subscribe(
        "Quote",
        query_handler(|_| async { Ok::<_, HandlerError>(json!("a")) }),
    );
    b.queries().subscribe(
        "Quote",
        query_handler(|_| async { Ok::<_, HandlerError>(json!("b")) }),
    );

    assert!(registration.cancel());

    let answer = b
        .queries()
        .query(QueryMessage::new("Quote", json!({})))
        .await
        .unwrap();
    assert_eq!(answer, json!("b"));
}
