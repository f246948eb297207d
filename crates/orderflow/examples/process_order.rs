//! Submits a handful of orders and prints their final status and history.
//!
//! Run with `cargo run --example process_order`. Settings come from an
//! optional `orderflow.toml` and `ORDERFLOW__*` environment variables, e.g.
//! `ORDERFLOW__FAULTS__PAYMENT_SUCCESS_RATE=0.2` to watch payment retries.

use orderflow::prelude::*;
use orderflow::telemetry::init_tracing;
use orderflow::HistoryResponse;
use std::sync::Arc;

fn order(product_id: &str, quantity: u32, address: &str) -> OrderRequest {
    OrderRequest {
        product_id: product_id.to_string(),
        quantity,
        customer_id: "cust-123".to_string(),
        customer_address: address.to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = OrderflowConfig::load()?;
    init_tracing(&config.log)?;

    let engine = OrderEngine::from_config(
        &config,
        Arc::new(InMemoryStore::new()),
        Arc::new(Catalog::demo()),
    )?;

    let orders = [
        order("prod-001", 2, "123 Main Street, Springfield"),
        order("prod-004", 4, "Remote cabin, Yukon"),
        order("prod-003", 1, "123 Main Street, Springfield"),
        order("prod-002", 20, "123 Main Street, Springfield"),
    ];

    let mut ids = Vec::new();
    for request in orders {
        ids.push(engine.submit(request).await?);
    }

    for id in ids {
        let status = engine.wait_for_completion(&id).await?;
        println!("{}", serde_json::to_string_pretty(&status)?);

        let history = HistoryResponse {
            workflow_id: id.clone(),
            history: engine.history(&id).await?,
        };
        for event in &history.history {
            println!("  #{} {} {:?}", event.event_id, event.time, event.event);
        }
    }

    Ok(())
}
