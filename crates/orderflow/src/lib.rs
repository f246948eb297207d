//! Durable order fulfillment: inventory, payment and shipping run as
//! activities with per-step timeouts and retries, sequenced by a
//! deterministic orchestrator whose history can be polled and replayed.
//!
//! # Example
//!
//! ```rust,ignore
//! use orderflow::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OrderflowConfig::load()?;
//!     let engine = OrderEngine::from_config(
//!         &config,
//!         Arc::new(InMemoryStore::new()),
//!         Arc::new(Catalog::demo()),
//!     )?;
//!
//!     let id = engine
//!         .submit(OrderRequest {
//!             product_id: "prod-001".to_string(),
//!             quantity: 2,
//!             customer_id: "cust-123".to_string(),
//!             customer_address: "123 Main Street".to_string(),
//!         })
//!         .await?;
//!
//!     let status = engine.wait_for_completion(&id).await?;
//!     println!("{} finished as {}", id, status.status);
//!     Ok(())
//! }
//! ```

pub mod activities;
pub mod config;
pub mod engine;
pub mod executor;
pub mod faults;
pub mod memory_store;
pub mod orchestrator;
pub mod projector;
pub mod telemetry;

// Re-export core types
pub use orderflow_core::*;

pub use activities::{Activities, Catalog, CatalogItem};
pub use config::OrderflowConfig;
pub use engine::OrderEngine;
pub use memory_store::InMemoryStore;
pub use projector::{HistoryResponse, StatusResponse};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::faults::{FaultInjector, RandomFaults, ScriptedFaults};
    pub use crate::{
        Activities, Catalog, EventType, FailureReason, HistoryEvent, InMemoryStore,
        OrderEngine, OrderRequest, OrderResult, OrderflowConfig, StatusResponse, WorkflowError,
        WorkflowId, WorkflowState,
    };
}
