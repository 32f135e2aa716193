//! embedded-broker: demo of several modules sharing one in-process broker
//!
//! Connects the configured modules (or an `orders` and a `shipping` module
//! when none are configured), then walks through one round of each message
//! kind:
//!
//! - a command claimed by one module and sent from another
//! - a scatter-gather query answered by both modules
//! - a shared event published by `orders` and read by `shipping`
//!
//! ## Configuration
//! ```yaml
//! shared_event_types: [OrderPlaced]
//! modules:
//!   - name: orders
//!     replication: forwarded
//!   - name: shipping
//!     local_event_store: false
//! ```
//!
//! Usage: `embedded-broker [config.yaml]`

use std::time::Duration;

use serde_json::json;
use tracing::{error, info};

use embedded_broker::config::{BrokerConfig, ModuleConfig};
use embedded_broker::message::{CommandMessage, EventMessage, QueryMessage};
use embedded_broker::replication::ModuleEventStore;
use embedded_broker::routing::{command_handler, query_handler, HandlerError};
use embedded_broker::utils::bootstrap::{init_tracing, run_until_ctrl_c};
use embedded_broker::{EmbeddedBroker, Module};

const ORDERS: &str = "orders";
const SHIPPING: &str = "shipping";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let path = std::env::args().nth(1);
    let mut config = BrokerConfig::load(path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    if config.modules.is_empty() {
        config.modules = vec![ModuleConfig::new(ORDERS), ModuleConfig::global_only(SHIPPING)];
    }
    if config.shared_event_types.is_empty() {
        config.shared_event_types = vec!["OrderPlaced".to_string()];
    }

    let broker = EmbeddedBroker::in_memory(config);
    let modules = broker.connect_all().await?;
    info!(modules = modules.len(), "Modules connected");

    match run_until_ctrl_c(run_demo(&modules)).await {
        Some(Err(e)) => error!(error = %e, "Demo failed"),
        Some(Ok(())) => info!("Demo finished"),
        None => {}
    }

    for module in modules {
        module.shutdown().await;
    }
    Ok(())
}

async fn run_demo(modules: &[Module]) -> Result<(), Box<dyn std::error::Error>> {
    let (Some(producer), Some(consumer)) = (modules.first(), modules.last()) else {
        return Ok(());
    };

    let _ship = consumer.commands().subscribe(
        "ShipOrder",
        command_handler(|command| async move {
            Ok::<_, HandlerError>(json!({ "shipped": command.payload["order_id"] }))
        }),
    )?;
    let shipped = producer
        .commands()
        .send(CommandMessage::new("ShipOrder", json!({ "order_id": "o-1" })))
        .await?;
    info!(result = %shipped, "Command answered");

    for module in modules {
        let name = module.name().to_string();
        module.queries().subscribe(
            "Status",
            query_handler(move |_| {
                let name = name.clone();
                async move { Ok::<_, HandlerError>(json!({ "module": name, "healthy": true })) }
            }),
        );
    }
    let statuses = producer
        .queries()
        .scatter_gather(QueryMessage::new("Status", json!({})))
        .collect()
        .await;
    info!(answers = statuses.len(), "Scatter-gather completed");

    let mut stream = consumer.events().open_stream(None)?;
    producer
        .events()
        .publish(vec![EventMessage::domain(
            "order",
            "o-1",
            0,
            "OrderPlaced",
            json!({ "order_id": "o-1" }),
        )])
        .await?;
    if stream
        .has_next_available_within(Duration::from_secs(2))
        .await?
    {
        let tracked = stream.next_available().await?;
        info!(
            module = %consumer.name(),
            event_type = %tracked.event.event_type,
            origin = ?tracked.event.origin(),
            "Shared event received"
        );
    }
    stream.close();
    Ok(())
}
