use async_trait::async_trait;
use orderflow_core::{Activity, ActivityError, ActivityName, ActivityOptions, InventoryOutcome};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::CHECK_INVENTORY;

/// One product in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogItem {
    /// The units available for reservation
    pub stock: u32,
    /// The price per unit
    pub unit_price: Decimal,
}

/// Product stock shared by every workflow instance.
///
/// A reservation is checked and applied under one lock, so concurrent
/// orders for the same product can never oversell.
#[derive(Debug, Default)]
pub struct Catalog {
    items: Mutex<HashMap<String, CatalogItem>>,
}

impl Catalog {
    pub fn new(items: impl IntoIterator<Item = (String, CatalogItem)>) -> Self {
        Self {
            items: Mutex::new(items.into_iter().collect()),
        }
    }

    /// The five demo products.
    pub fn demo() -> Self {
        let item = |stock, cents| CatalogItem {
            stock,
            unit_price: Decimal::new(cents, 2),
        };
        Self::new([
            ("prod-001".to_string(), item(50, 1999)),
            ("prod-002".to_string(), item(10, 4999)),
            ("prod-003".to_string(), item(0, 999)),
            ("prod-004".to_string(), item(100, 500)),
            ("prod-005".to_string(), item(25, 9900)),
        ])
    }

    pub fn stock(&self, product_id: &str) -> Option<u32> {
        self.lock().get(product_id).map(|item| item.stock)
    }

    /// Inserts or replaces a product.
    pub fn upsert(&self, product_id: impl Into<String>, item: CatalogItem) {
        self.lock().insert(product_id.into(), item);
    }

    /// Reserves `quantity` units if the full amount is in stock.
    ///
    /// `reserved_quantity` reports `min(stock, quantity)`; stock is only
    /// decremented when the order can be filled completely. Unknown products
    /// are reported as unavailable with a zero price.
    pub fn reserve(&self, product_id: &str, quantity: u32) -> InventoryOutcome {
        let mut items = self.lock();
        let Some(item) = items.get_mut(product_id) else {
            return InventoryOutcome::unavailable();
        };

        let reserved = item.stock.min(quantity);
        let available = reserved == quantity && reserved > 0;
        if available {
            item.stock -= reserved;
        }
        InventoryOutcome {
            available,
            reserved_quantity: reserved,
            unit_price: item.unit_price,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CatalogItem>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryRequest {
    pub product_id: String,
    pub quantity: u32,
}

/// Looks the product up and reserves stock.
#[derive(Debug, Clone)]
pub struct CheckInventory {
    catalog: Arc<Catalog>,
    options: ActivityOptions,
}

impl CheckInventory {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            options: ActivityOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ActivityOptions) -> Self {
        self.options = options;
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }
}

#[async_trait]
impl Activity for CheckInventory {
    type Input = InventoryRequest;
    type Output = InventoryOutcome;

    async fn execute(&self, input: &InventoryRequest) -> Result<InventoryOutcome, ActivityError> {
        let outcome = self.catalog.reserve(&input.product_id, input.quantity);
        debug!(
            product_id = %input.product_id,
            requested = input.quantity,
            reserved = outcome.reserved_quantity,
            available = outcome.available,
            "inventory checked"
        );
        Ok(outcome)
    }

    fn name(&self) -> ActivityName {
        ActivityName::new(CHECK_INVENTORY)
    }

    fn options(&self) -> ActivityOptions {
        self.options.clone()
    }
}
