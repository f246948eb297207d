use crate::faults::FaultInjector;
use async_trait::async_trait;
use chrono::{Datelike, Days, NaiveDate, Utc, Weekday};
use orderflow_core::{
    round_money, Activity, ActivityError, ActivityName, ActivityOptions, ShippingOutcome,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::CALCULATE_SHIPPING;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingRequest {
    pub reserved_quantity: u32,
    pub total_amount: Decimal,
    pub customer_address: String,
}

impl ShippingRequest {
    /// 2 for addresses that mention "remote" (any case), 1 otherwise.
    pub fn distance_factor(&self) -> u32 {
        if self.customer_address.to_lowercase().contains("remote") {
            2
        } else {
            1
        }
    }

    /// `4.99 + 1.5 × quantity × distance factor`, rounded to cents.
    pub fn shipping_cost(&self) -> Decimal {
        let base = Decimal::new(499, 2);
        let per_item = Decimal::new(15, 1);
        let units = Decimal::from(self.reserved_quantity) * Decimal::from(self.distance_factor());
        round_money(base + per_item * units)
    }
}

/// Adds `days` business days (Monday to Friday) to `date`.
///
/// ```
/// use chrono::NaiveDate;
/// use orderflow::activities::add_business_days;
///
/// let friday = NaiveDate::from_ymd_opt(2024, 5, 3).unwrap();
/// assert_eq!(add_business_days(friday, 1), NaiveDate::from_ymd_opt(2024, 5, 6).unwrap());
/// ```
pub fn add_business_days(date: NaiveDate, days: u32) -> NaiveDate {
    let mut current = date;
    let mut remaining = days;
    while remaining > 0 {
        current = match current.checked_add_days(Days::new(1)) {
            Some(next) => next,
            None => return current,
        };
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            remaining -= 1;
        }
    }
    current
}

/// Prices shipping and estimates delivery.
#[derive(Debug, Clone)]
pub struct CalculateShipping {
    faults: Arc<dyn FaultInjector>,
    options: ActivityOptions,
}

impl CalculateShipping {
    pub fn new(faults: Arc<dyn FaultInjector>) -> Self {
        Self {
            faults,
            options: ActivityOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ActivityOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl Activity for CalculateShipping {
    type Input = ShippingRequest;
    type Output = ShippingOutcome;

    async fn execute(&self, input: &ShippingRequest) -> Result<ShippingOutcome, ActivityError> {
        let shipping_cost = input.shipping_cost();
        let days = self.faults.delivery_days();
        let estimated_delivery = add_business_days(Utc::now().date_naive(), days);
        let final_total = round_money(input.total_amount + shipping_cost);
        debug!(%shipping_cost, %final_total, %estimated_delivery, "shipping calculated");
        Ok(ShippingOutcome {
            shipping_cost,
            estimated_delivery,
            final_total,
        })
    }

    fn name(&self) -> ActivityName {
        ActivityName::new(CALCULATE_SHIPPING)
    }

    fn options(&self) -> ActivityOptions {
        self.options.clone()
    }
}
