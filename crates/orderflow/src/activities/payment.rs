use crate::faults::FaultInjector;
use async_trait::async_trait;
use orderflow_core::{
    round_money, Activity, ActivityError, ActivityName, ActivityOptions, PaymentOutcome,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::PROCESS_PAYMENT;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub reserved_quantity: u32,
    pub unit_price: Decimal,
    pub customer_id: String,
}

impl PaymentRequest {
    pub fn total_amount(&self) -> Decimal {
        round_money(Decimal::from(self.reserved_quantity) * self.unit_price)
    }
}

/// Charges the customer. Declines are reported as retryable errors.
#[derive(Debug, Clone)]
pub struct ProcessPayment {
    faults: Arc<dyn FaultInjector>,
    options: ActivityOptions,
}

impl ProcessPayment {
    pub fn new(faults: Arc<dyn FaultInjector>) -> Self {
        Self {
            faults,
            options: ActivityOptions {
                start_to_close_timeout: std::time::Duration::from_secs(15),
                ..ActivityOptions::default()
            },
        }
    }

    pub fn with_options(mut self, options: ActivityOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl Activity for ProcessPayment {
    type Input = PaymentRequest;
    type Output = PaymentOutcome;

    async fn execute(&self, input: &PaymentRequest) -> Result<PaymentOutcome, ActivityError> {
        let total_amount = input.total_amount();
        if !self.faults.payment_succeeds() {
            warn!(customer_id = %input.customer_id, %total_amount, "payment declined");
            return Err(ActivityError::failed(
                PROCESS_PAYMENT,
                "Payment processing failed",
            ));
        }

        let transaction_id = Uuid::new_v4().to_string();
        debug!(customer_id = %input.customer_id, %total_amount, %transaction_id, "payment captured");
        Ok(PaymentOutcome {
            payment_successful: true,
            transaction_id,
            total_amount,
        })
    }

    fn name(&self) -> ActivityName {
        ActivityName::new(PROCESS_PAYMENT)
    }

    fn options(&self) -> ActivityOptions {
        self.options.clone()
    }
}
