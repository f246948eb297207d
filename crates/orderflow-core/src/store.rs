//! Boundary to the durable execution store.

use crate::error::StoreError;
use crate::history::{EventType, HistoryEvent, HistoryPage, WorkflowId, WorkflowState};
use crate::order::{FailureReason, OrderRequest, OrderResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted state of one workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRecord {
    pub id: WorkflowId,
    pub input: OrderRequest,
    pub state: WorkflowState,
    /// Populated as soon as inventory has been checked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<OrderResult>,
    /// Failure that stopped the workflow before any result existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl WorkflowRecord {
    /// A freshly submitted, running record.
    pub fn running(id: WorkflowId, input: OrderRequest, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            input,
            state: WorkflowState::Running,
            result: None,
            failure: None,
            started_at,
            closed_at: None,
        }
    }
}

/// How a workflow is closed by [`WorkflowStore::finish`].
#[derive(Debug, Clone, PartialEq)]
pub struct Closing {
    /// Terminal state to assign.
    pub state: WorkflowState,
    pub result: Option<OrderResult>,
    pub failure: Option<FailureReason>,
    /// Payload of the closing history event.
    pub data: serde_json::Value,
}

/// Durable storage for workflow records and their history.
///
/// ## Invariants
///
/// - `append_event` assigns consecutive event ids starting at 1 and
///   timestamps that never decrease within one workflow.
/// - `finish` assigns exactly one terminal state and appends the matching
///   closing event in the same step. Afterwards the record and its history
///   are frozen: further `save_progress`, `append_event` or `finish` calls
///   return [`StoreError::AlreadyTerminal`].
/// - `read_history` never reorders or drops events that were returned before.
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    /// Creates a record. Fails with `AlreadyExists` on a duplicate id.
    async fn create(&self, record: WorkflowRecord) -> Result<(), StoreError>;

    /// Reads a record.
    async fn get(&self, id: &WorkflowId) -> Result<WorkflowRecord, StoreError>;

    /// Stores the partial result of a running workflow.
    async fn save_progress(&self, id: &WorkflowId, result: &OrderResult)
        -> Result<(), StoreError>;

    /// Moves a running workflow into a terminal state.
    async fn finish(&self, id: &WorkflowId, closing: Closing)
        -> Result<WorkflowRecord, StoreError>;

    /// Appends an event to the workflow's history.
    async fn append_event(
        &self,
        id: &WorkflowId,
        event: EventType,
        data: serde_json::Value,
    ) -> Result<HistoryEvent, StoreError>;

    /// Reads up to `page_size` events starting at event id `from`
    /// (`None` = from the beginning).
    async fn read_history(
        &self,
        id: &WorkflowId,
        from: Option<u64>,
        page_size: usize,
    ) -> Result<HistoryPage, StoreError>;

    /// Ids of every workflow still in `RUNNING`.
    async fn list_running(&self) -> Result<Vec<WorkflowId>, StoreError>;
}
