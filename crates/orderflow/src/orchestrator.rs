//! The order pipeline as a deterministic state machine.
//!
//! The orchestrator never performs I/O, reads the clock or draws random
//! numbers. It turns activity resolutions into the next command, so feeding
//! it the same recorded resolutions always yields the same result. That is
//! what makes recovery by replay possible.

use crate::activities::{
    InventoryRequest, PaymentRequest, ShippingRequest, CALCULATE_SHIPPING, CHECK_INVENTORY,
    PROCESS_PAYMENT,
};
use orderflow_core::{
    EventType, FailureReason, HistoryEvent, InventoryOutcome, OrderRequest, OrderResult,
    PaymentOutcome, ShippingOutcome, WorkflowError,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Init,
    CheckingInventory,
    Paying,
    Shipping,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "INIT",
            Phase::CheckingInventory => "CHECKING_INVENTORY",
            Phase::Paying => "PAYING",
            Phase::Shipping => "SHIPPING",
            Phase::Done => "DONE",
        };
        write!(f, "{}", name)
    }
}

/// What the runtime must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CheckInventory(InventoryRequest),
    ProcessPayment(PaymentRequest),
    CalculateShipping(ShippingRequest),
    /// The pipeline reached its end; the result may carry a captured failure.
    Complete(OrderResult),
    /// Inventory could not be checked at all.
    Fail(FailureReason),
}

/// Final outcome of an activity, after retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Inventory(Result<InventoryOutcome, FailureReason>),
    Payment(Result<PaymentOutcome, FailureReason>),
    Shipping(Result<ShippingOutcome, FailureReason>),
}

impl Resolution {
    fn activity(&self) -> &'static str {
        match self {
            Resolution::Inventory(_) => CHECK_INVENTORY,
            Resolution::Payment(_) => PROCESS_PAYMENT,
            Resolution::Shipping(_) => CALCULATE_SHIPPING,
        }
    }
}

/// State of one order run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderOrchestrator {
    input: OrderRequest,
    phase: Phase,
    result: Option<OrderResult>,
    failure: Option<FailureReason>,
}

impl OrderOrchestrator {
    pub fn new(input: OrderRequest) -> Self {
        Self {
            input,
            phase: Phase::Init,
            result: None,
            failure: None,
        }
    }

    pub fn input(&self) -> &OrderRequest {
        &self.input
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Result fields populated so far.
    pub fn result(&self) -> Option<&OrderResult> {
        self.result.as_ref()
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        self.failure.as_ref()
    }

    /// INIT → CHECKING_INVENTORY.
    pub fn start(&mut self) -> Result<Command, WorkflowError> {
        if self.phase != Phase::Init {
            return Err(WorkflowError::Nondeterminism(format!(
                "workflow started twice (phase {})",
                self.phase
            )));
        }
        self.phase = Phase::CheckingInventory;
        Ok(Command::CheckInventory(InventoryRequest {
            product_id: self.input.product_id.clone(),
            quantity: self.input.quantity,
        }))
    }

    /// Applies the outcome of the outstanding activity and returns the next
    /// command.
    pub fn resolve(&mut self, resolution: Resolution) -> Result<Command, WorkflowError> {
        match (self.phase, resolution) {
            (Phase::CheckingInventory, Resolution::Inventory(Ok(inventory))) => {
                let reserved = inventory.is_reserved();
                let request = PaymentRequest {
                    reserved_quantity: inventory.reserved_quantity,
                    unit_price: inventory.unit_price,
                    customer_id: self.input.customer_id.clone(),
                };
                self.result = Some(OrderResult::new(inventory));
                if !reserved {
                    return Ok(self.complete());
                }
                self.phase = Phase::Paying;
                Ok(Command::ProcessPayment(request))
            }
            (Phase::CheckingInventory, Resolution::Inventory(Err(reason))) => {
                self.phase = Phase::Done;
                self.failure = Some(reason.clone());
                Ok(Command::Fail(reason))
            }
            (Phase::Paying, Resolution::Payment(Ok(payment))) => {
                let customer_address = self.input.customer_address.clone();
                let result = self.result_mut()?;
                let request = ShippingRequest {
                    reserved_quantity: result.inventory.reserved_quantity,
                    total_amount: payment.total_amount,
                    customer_address,
                };
                result.payment = Some(payment);
                self.phase = Phase::Shipping;
                Ok(Command::CalculateShipping(request))
            }
            (Phase::Shipping, Resolution::Shipping(Ok(shipping))) => {
                self.result_mut()?.shipping = Some(shipping);
                Ok(self.complete())
            }
            (Phase::Paying, Resolution::Payment(Err(reason)))
            | (Phase::Shipping, Resolution::Shipping(Err(reason))) => {
                self.result_mut()?.error_message = Some(reason);
                Ok(self.complete())
            }
            (phase, resolution) => Err(WorkflowError::Nondeterminism(format!(
                "unexpected {} outcome in phase {}",
                resolution.activity(),
                phase
            ))),
        }
    }

    fn complete(&mut self) -> Command {
        self.phase = Phase::Done;
        match &self.result {
            Some(result) => Command::Complete(result.clone()),
            None => Command::Complete(OrderResult::new(InventoryOutcome::unavailable())),
        }
    }

    fn result_mut(&mut self) -> Result<&mut OrderResult, WorkflowError> {
        let phase = self.phase;
        self.result.as_mut().ok_or_else(|| {
            WorkflowError::Nondeterminism(format!("no inventory result in phase {}", phase))
        })
    }
}

/// Rebuilds an orchestrator from recorded resolutions.
///
/// Returns the orchestrator and the command that is due next.
pub fn replay(
    input: OrderRequest,
    resolutions: impl IntoIterator<Item = Resolution>,
) -> Result<(OrderOrchestrator, Command), WorkflowError> {
    let mut orchestrator = OrderOrchestrator::new(input);
    let mut command = orchestrator.start()?;
    for resolution in resolutions {
        command = orchestrator.resolve(resolution)?;
    }
    Ok((orchestrator, command))
}

enum Recorded<'a> {
    Completed(&'a serde_json::Value),
    Failed(FailureReason),
}

/// Extracts final activity outcomes from a history log.
///
/// Completed attempts and failed attempts that were not retried count;
/// intermediate failures are skipped.
pub fn resolutions_from_history(
    events: &[HistoryEvent],
) -> Result<Vec<Resolution>, WorkflowError> {
    let mut resolutions = Vec::new();
    for event in events {
        let recorded = match event.event {
            EventType::ActivityTaskCompleted => Recorded::Completed(&event.data["result"]),
            EventType::ActivityTaskFailed | EventType::ActivityTaskTimedOut => {
                if event.data["willRetry"].as_bool().unwrap_or(false) {
                    continue;
                }
                Recorded::Failed(parse(event, &event.data["failure"])?)
            }
            _ => continue,
        };

        let resolution = match event.data["activity"].as_str().unwrap_or_default() {
            CHECK_INVENTORY => Resolution::Inventory(decode(event, recorded)?),
            PROCESS_PAYMENT => Resolution::Payment(decode(event, recorded)?),
            CALCULATE_SHIPPING => Resolution::Shipping(decode(event, recorded)?),
            other => {
                return Err(WorkflowError::Nondeterminism(format!(
                    "event {} references unknown activity '{}'",
                    event.event_id, other
                )))
            }
        };
        resolutions.push(resolution);
    }
    Ok(resolutions)
}

/// Attempts already spent on the activity that has no final outcome yet.
///
/// Counts `ACTIVITY_TASK_SCHEDULED` events after the last final outcome. An
/// attempt that was scheduled but never reported back counts as spent.
pub fn attempts_in_flight(events: &[HistoryEvent]) -> u32 {
    let mut attempts = 0;
    for event in events {
        match event.event {
            EventType::ActivityTaskScheduled => attempts += 1,
            EventType::ActivityTaskCompleted => attempts = 0,
            EventType::ActivityTaskFailed | EventType::ActivityTaskTimedOut => {
                if !event.data["willRetry"].as_bool().unwrap_or(false) {
                    attempts = 0;
                }
            }
            _ => {}
        }
    }
    attempts
}

fn decode<T: DeserializeOwned>(
    event: &HistoryEvent,
    recorded: Recorded<'_>,
) -> Result<Result<T, FailureReason>, WorkflowError> {
    match recorded {
        Recorded::Completed(value) => Ok(Ok(parse(event, value)?)),
        Recorded::Failed(reason) => Ok(Err(reason)),
    }
}

fn parse<T: DeserializeOwned>(
    event: &HistoryEvent,
    value: &serde_json::Value,
) -> Result<T, WorkflowError> {
    serde_json::from_value(value.clone()).map_err(|e| {
        WorkflowError::Nondeterminism(format!(
            "event {} has an unreadable payload: {}",
            event.event_id, e
        ))
    })
}
