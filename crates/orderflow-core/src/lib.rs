//! Core types, traits and errors for the orderflow order workflow.
//!
//! This crate has no runtime dependencies. It defines the contract shared by
//! the orchestrator, the activities and the durable store.
//!
//! # Core Types
//!
//! - [`Activity`] - A retried, side-effecting step of the pipeline
//! - [`RetryPolicy`] / [`ActivityOptions`] - Attempt limits, backoff and timeouts
//! - [`OrderRequest`] / [`OrderResult`] - Workflow input and aggregated result
//! - [`HistoryEvent`] / [`WorkflowState`] - The observable trace and status
//! - [`WorkflowStore`] - Durable storage boundary
//! - [`WorkflowError`] - Errors surfaced to callers

mod activity;
mod error;
mod history;
mod order;
mod store;

pub use activity::{Activity, ActivityName, ActivityOptions, RetryPolicy, RetryPolicyError};
pub use error::{ActivityError, StoreError, WorkflowError};
pub use history::{EventType, HistoryEvent, HistoryPage, WorkflowId, WorkflowState};
pub use order::{
    round_money, FailureCode, FailureReason, InventoryOutcome, OrderRequest, OrderResult,
    PaymentOutcome, ShippingOutcome,
};
pub use store::{Closing, WorkflowRecord, WorkflowStore};
