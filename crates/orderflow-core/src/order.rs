//! Order data model: the workflow input, per-activity outcomes and the
//! aggregated result.

use crate::activity::ActivityName;
use crate::error::{ActivityError, WorkflowError};
use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rounds a monetary amount to two decimal places, half away from zero.
///
/// ```
/// use orderflow_core::round_money;
/// use rust_decimal::Decimal;
///
/// assert_eq!(round_money(Decimal::new(10985, 3)), Decimal::new(1099, 2));
/// ```
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Immutable input of one workflow instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    /// The catalog product to order
    pub product_id: String,
    /// The number of units requested
    pub quantity: u32,
    /// The paying customer
    pub customer_id: String,
    /// The delivery address; "remote" anywhere in it doubles shipping distance
    pub customer_address: String,
}

impl OrderRequest {
    /// Checks the request before a workflow is started for it.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.product_id.trim().is_empty() {
            return Err(WorkflowError::InvalidRequest(
                "productId must not be empty".to_string(),
            ));
        }
        if self.quantity == 0 {
            return Err(WorkflowError::InvalidRequest(
                "quantity must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of the inventory check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryOutcome {
    /// Whether the full quantity was reserved
    pub available: bool,
    /// The units in stock up to the requested quantity
    pub reserved_quantity: u32,
    /// The catalog price per unit, zero for unknown products
    pub unit_price: Decimal,
}

impl InventoryOutcome {
    /// Outcome for a product the catalog does not know.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            reserved_quantity: 0,
            unit_price: Decimal::ZERO,
        }
    }

    /// Whether the pipeline may continue to payment.
    pub fn is_reserved(&self) -> bool {
        self.available && self.reserved_quantity > 0
    }
}

/// Outcome of a successful payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOutcome {
    /// Always `true`; a declined payment is an activity error
    pub payment_successful: bool,
    /// The id assigned to the charge
    pub transaction_id: String,
    /// The charged amount, reserved quantity times unit price
    pub total_amount: Decimal,
}

/// Outcome of the shipping calculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingOutcome {
    /// The shipping charge, rounded to cents
    pub shipping_cost: Decimal,
    /// The expected delivery date, counted in business days
    pub estimated_delivery: NaiveDate,
    /// The payment total plus shipping
    pub final_total: Decimal,
}

/// Short machine-readable classification of a captured failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    /// Every attempt reported an error.
    RetriesExhausted,
    /// The final attempt exceeded its start-to-close timeout.
    StartToCloseTimeout,
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCode::RetriesExhausted => write!(f, "RETRIES_EXHAUSTED"),
            FailureCode::StartToCloseTimeout => write!(f, "START_TO_CLOSE_TIMEOUT"),
        }
    }
}

/// Structured reason a pipeline halted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReason {
    pub code: FailureCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<ActivityName>,
    pub message: String,
}

impl FailureReason {
    /// Builds the reason recorded after the last attempt of an activity failed.
    pub fn from_last_attempt(error: &ActivityError) -> Self {
        let code = match error {
            ActivityError::Timeout { .. } => FailureCode::StartToCloseTimeout,
            _ => FailureCode::RetriesExhausted,
        };
        Self {
            code,
            activity: Some(error.activity().clone()),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.activity {
            Some(activity) => write!(f, "[{}] {}: {}", self.code, activity, self.message),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

/// Aggregated result of one order. Fields are written once, in pipeline order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResult {
    pub inventory: InventoryOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping: Option<ShippingOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<FailureReason>,
}

impl OrderResult {
    pub fn new(inventory: InventoryOutcome) -> Self {
        Self {
            inventory,
            payment: None,
            shipping: None,
            error_message: None,
        }
    }

    /// Whether the pipeline halted on a payment or shipping failure.
    pub fn is_failed(&self) -> bool {
        self.error_message.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn request(quantity: u32) -> OrderRequest {
        OrderRequest {
            product_id: "prod-001".to_string(),
            quantity,
            customer_id: "cust-1".to_string(),
            customer_address: "1 Main St".to_string(),
        }
    }

    #[test]
    fn test_round_money() {
        let d = |s: &str| Decimal::from_str(s).unwrap();
        assert_eq!(round_money(d("39.98")), d("39.98"));
        assert_eq!(round_money(d("10.985")), d("10.99"));
        assert_eq!(round_money(d("7.994")), d("7.99"));
    }

    #[test]
    fn test_request_validation() {
        assert!(request(2).validate().is_ok());
        assert!(matches!(
            request(0).validate(),
            Err(WorkflowError::InvalidRequest(_))
        ));

        let mut blank = request(1);
        blank.product_id = "  ".to_string();
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_request_uses_camel_case() {
        let json = serde_json::to_value(request(2)).unwrap();
        assert_eq!(json["productId"], "prod-001");
        assert_eq!(json["customerAddress"], "1 Main St");
    }

    #[test]
    fn test_inventory_reserved() {
        assert!(!InventoryOutcome::unavailable().is_reserved());
        let outcome = InventoryOutcome {
            available: true,
            reserved_quantity: 2,
            unit_price: Decimal::from_str("19.99").unwrap(),
        };
        assert!(outcome.is_reserved());
    }

    #[test]
    fn test_failure_reason_from_error() {
        let reason = FailureReason::from_last_attempt(&ActivityError::failed(
            "processPayment",
            "Payment processing failed",
        ));
        assert_eq!(reason.code, FailureCode::RetriesExhausted);
        assert_eq!(reason.activity, Some(ActivityName::new("processPayment")));

        let reason = FailureReason::from_last_attempt(&ActivityError::Timeout {
            activity: ActivityName::new("calculateShipping"),
            timeout: std::time::Duration::from_secs(10),
        });
        assert_eq!(reason.code, FailureCode::StartToCloseTimeout);
        assert!(reason.to_string().starts_with("[START_TO_CLOSE_TIMEOUT] calculateShipping:"));
    }

    #[test]
    fn test_result_omits_absent_fields() {
        let result = OrderResult::new(InventoryOutcome::unavailable());
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("payment").is_none());
        assert!(json.get("errorMessage").is_none());
        assert_eq!(json["inventory"]["reservedQuantity"], 0);
        assert!(!result.is_failed());
    }
}
