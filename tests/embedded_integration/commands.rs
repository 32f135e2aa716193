//! Command routing across modules.

use crate::common::*;

#[tokio::test]
async fn test_one_owner_per_command_across_modules() {
    let broker = test_broker();
    let orders = connect_global(&broker, "orders").await;
    let billing = connect_global(&broker, "billing").await;

    let _claim = orders
        .commands()
        .subscribe(
            "PlaceOrder",
            command_handler(|_| async { Ok::<_, HandlerError>(json!("orders")) }),
        )
        .unwrap();
    let rejected = billing.commands().subscribe(
        "PlaceOrder",
        command_handler(|_| async { Ok::<_, HandlerError>(json!("billing")) }),
    );

    match rejected {
        Err(RoutingError::AlreadyOwned { name, owner }) => {
            assert_eq!(name, "PlaceOrder");
            assert_eq!(owner, "orders");
        }
        other => panic!("expected AlreadyOwned, got {other:?}"),
    }

    // Either module's dispatch reaches the single owner.
    for module in [&orders, &billing] {
        let result = module
            .commands()
            .send(CommandMessage::new("PlaceOrder", json!({})))
            .await
            .unwrap();
        assert_eq!(result, json!("orders"));
    }
}

#[tokio::test]
async fn test_ownership_is_claimable_after_owner_leaves() {
    let broker = test_broker();
    let orders = connect_global(&broker, "orders").await;
    let billing = connect_global(&broker, "billing").await;
    orders
        .commands()
        .subscribe(
            "PlaceOrder",
            command_handler(|_| async { Ok::<_, HandlerError>(json!("orders")) }),
        )
        .unwrap();

    orders.shutdown().await;

    let _claim = billing
        .commands()
        .subscribe(
            "PlaceOrder",
            command_handler(|_| async { Ok::<_, HandlerError>(json!("billing")) }),
        )
        .unwrap();
    let result = billing
        .commands()
        .send(CommandMessage::new("PlaceOrder", json!({})))
        .await
        .unwrap();
    assert_eq!(result, json!("billing"));
}

#[tokio::test]
async fn test_unhandled_command_reported_through_callback() {
    let broker = test_broker();
    let orders = connect_global(&broker, "orders").await;
    let (tx, rx) = tokio::sync::oneshot::channel();

    orders
        .commands()
        .dispatch(
            CommandMessage::new("CancelOrder", json!({})),
            move |_: &CommandMessage, result: Result<Value, CommandError>| {
                let _ = tx.send(result);
            },
        )
        .await;

    let result = rx.await.unwrap();
    assert!(matches!(result, Err(CommandError::NoHandler { name }) if name == "CancelOrder"));
}

#[tokio::test]
async fn test_handler_failure_relayed_unchanged() {
    let broker = test_broker();
    let orders = connect_global(&broker, "orders").await;
    let billing = connect_global(&broker, "billing").await;
    let _claim = orders
        .commands()
        .subscribe(
            "PlaceOrder",
            command_handler(|_| async {
                Err::<Value, _>(
                    HandlerError::new("out of stock").with_details(json!({ "sku": "A-1" })),
                )
            }),
        )
        .unwrap();

    let result = billing
        .commands()
        .send(CommandMessage::new("PlaceOrder", json!({})))
        .await;

    match result {
        Err(CommandError::Handler(e)) => {
            assert_eq!(e.message, "out of stock");
            assert_eq!(e.details, Some(json!({ "sku": "A-1" })));
        }
        other => panic!("expected handler error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_fire_and_forget_dispatch_runs_handler() {
    let broker = test_broker();
    let orders = connect_global(&broker, "orders").await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let _claim = orders
        .commands()
        .subscribe(
            "PlaceOrder",
            command_handler(move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, HandlerError>(Value::Null)
                }
            }),
        )
        .unwrap();

    orders
        .commands()
        .dispatch_and_log(CommandMessage::new("PlaceOrder", json!({})))
        .await;
    orders
        .commands()
        .dispatch_and_log(CommandMessage::new("Unknown", json!({})))
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_claims_from_many_modules_yield_one_owner() {
    let broker = Arc::new(test_broker());
    let mut modules = Vec::new();
    for i in 0..8 {
        modules.push(Arc::new(connect_global(&broker, &format!("module-{i}")).await));
    }

    let tasks: Vec<_> = modules
        .iter()
        .cloned()
        .map(|module| {
            tokio::spawn(async move {
                let name = module.name().to_string();
                module
                    .commands()
                    .subscribe(
                        "Reserve",
                        command_handler(move |_| {
                            let name = name.clone();
                            async move { Ok::<_, HandlerError>(json!(name)) }
                        }),
                    )
                    .is_ok()
            })
        })
        .collect();

    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    let owner = broker.command_router().owner("Reserve").unwrap();
    let answer = modules[0]
        .commands()
        .send(CommandMessage::new("Reserve", json!({})))
        .await
        .unwrap();
    assert_eq!(answer, json!(owner.label()));
}
