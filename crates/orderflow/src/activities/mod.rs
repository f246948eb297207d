//! The three pipeline activities and the shared product catalog.

mod inventory;
mod payment;
mod shipping;

pub use inventory::{Catalog, CatalogItem, CheckInventory, InventoryRequest};
pub use payment::{PaymentRequest, ProcessPayment};
pub use shipping::{add_business_days, CalculateShipping, ShippingRequest};

use crate::config::ActivitiesConfig;
use crate::faults::FaultInjector;
use config::ConfigError;
use std::sync::Arc;

pub const CHECK_INVENTORY: &str = "checkInventory";
pub const PROCESS_PAYMENT: &str = "processPayment";
pub const CALCULATE_SHIPPING: &str = "calculateShipping";

/// The activity set a workflow run dispatches to.
#[derive(Debug, Clone)]
pub struct Activities {
    pub inventory: CheckInventory,
    pub payment: ProcessPayment,
    pub shipping: CalculateShipping,
}

impl Activities {
    /// Activities with the built-in timeouts and retry policies.
    pub fn new(catalog: Arc<Catalog>, faults: Arc<dyn FaultInjector>) -> Self {
        Self {
            inventory: CheckInventory::new(catalog),
            payment: ProcessPayment::new(Arc::clone(&faults)),
            shipping: CalculateShipping::new(faults),
        }
    }

    /// Activities with timeouts and retry policies taken from configuration.
    pub fn from_config(
        config: &ActivitiesConfig,
        catalog: Arc<Catalog>,
        faults: Arc<dyn FaultInjector>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            inventory: CheckInventory::new(catalog).with_options(config.inventory.options()?),
            payment: ProcessPayment::new(Arc::clone(&faults))
                .with_options(config.payment.options()?),
            shipping: CalculateShipping::new(faults).with_options(config.shipping.options()?),
        })
    }
}
