//! Status and history views served to pollers.

use crate::orchestrator::Phase;
use orderflow_core::{
    FailureReason, HistoryEvent, OrderResult, StoreError, WorkflowId, WorkflowRecord,
    WorkflowState, WorkflowStore,
};
use serde::{Deserialize, Serialize};

/// Externally visible state of an orchestrator.
///
/// Running phases map to `RUNNING`. `DONE` maps to `FAILED` when a failure
/// was captured (or no result exists at all) and to `COMPLETED` otherwise,
/// including the early exit for unavailable inventory. `TERMINATED`,
/// `CANCELED` and `TIMED_OUT` are never produced here; they are imposed from
/// outside the orchestrator.
pub fn project_state(phase: Phase, result: Option<&OrderResult>) -> WorkflowState {
    match (phase, result) {
        (Phase::Done, Some(result)) if !result.is_failed() => WorkflowState::Completed,
        (Phase::Done, _) => WorkflowState::Failed,
        _ => WorkflowState::Running,
    }
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub workflow_id: WorkflowId,
    pub status: WorkflowState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<OrderResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
}

impl From<WorkflowRecord> for StatusResponse {
    fn from(record: WorkflowRecord) -> Self {
        Self {
            workflow_id: record.id,
            status: record.state,
            result: record.result,
            failure: record.failure,
        }
    }
}

/// Answer to a history query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub workflow_id: WorkflowId,
    pub history: Vec<HistoryEvent>,
}

/// Incremental reader over one workflow's history.
///
/// Each [`poll`](HistoryCursor::poll) returns only events appended since the
/// previous call, fetched page by page.
#[derive(Debug, Clone)]
pub struct HistoryCursor {
    id: WorkflowId,
    next_event_id: u64,
    page_size: usize,
}

impl HistoryCursor {
    pub fn new(id: WorkflowId, page_size: usize) -> Self {
        Self {
            id,
            next_event_id: 1,
            page_size: page_size.max(1),
        }
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        &self.id
    }

    pub async fn poll(&mut self, store: &dyn WorkflowStore) -> Result<Vec<HistoryEvent>, StoreError> {
        let mut events = Vec::new();
        loop {
            let page = store
                .read_history(&self.id, Some(self.next_event_id), self.page_size)
                .await?;
            if let Some(last) = page.events.last() {
                self.next_event_id = last.event_id + 1;
            }
            events.extend(page.events);
            if page.next_page_token.is_none() {
                return Ok(events);
            }
        }
    }
}

/// Reads the full history by concatenating every page.
pub async fn collect_history(
    store: &dyn WorkflowStore,
    id: &WorkflowId,
    page_size: usize,
) -> Result<Vec<HistoryEvent>, StoreError> {
    HistoryCursor::new(id.clone(), page_size).poll(store).await
}
