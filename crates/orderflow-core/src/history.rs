//! Workflow identity, externally visible state and the history event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a workflow instance.
///
/// ```
/// use orderflow_core::WorkflowId;
///
/// let id: WorkflowId = "order-42".into();
/// assert_eq!(id.as_str(), "order-42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    /// Creates a new workflow id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkflowId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for WorkflowId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for WorkflowId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for WorkflowId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Externally visible execution state of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    /// The pipeline has not finished yet
    Running,
    /// The pipeline finished without a captured failure
    Completed,
    /// An activity exhausted its retries
    Failed,
    /// An operator ended the workflow
    Terminated,
    /// Cancellation was requested and honored
    Canceled,
    /// The workflow exceeded its execution timeout
    TimedOut,
}

impl WorkflowState {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowState::Running)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowState::Running => "RUNNING",
            WorkflowState::Completed => "COMPLETED",
            WorkflowState::Failed => "FAILED",
            WorkflowState::Terminated => "TERMINATED",
            WorkflowState::Canceled => "CANCELED",
            WorkflowState::TimedOut => "TIMED_OUT",
        };
        write!(f, "{}", name)
    }
}

/// Symbolic name of a history event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// The workflow was submitted; carries the input
    WorkflowExecutionStarted,
    /// An activity attempt started
    ActivityTaskScheduled,
    /// An activity attempt returned a result
    ActivityTaskCompleted,
    /// An activity attempt returned an error
    ActivityTaskFailed,
    /// An activity attempt exceeded its start-to-close timeout
    ActivityTaskTimedOut,
    /// A caller asked for cancellation
    WorkflowExecutionCancelRequested,
    /// The workflow closed as `COMPLETED`
    WorkflowExecutionCompleted,
    /// The workflow closed as `FAILED`
    WorkflowExecutionFailed,
    /// The workflow closed as `CANCELED`
    WorkflowExecutionCanceled,
    /// The workflow closed as `TERMINATED`
    WorkflowExecutionTerminated,
    /// The workflow closed as `TIMED_OUT`
    WorkflowExecutionTimedOut,
}

impl EventType {
    /// The event that closes a workflow in the given terminal state.
    pub fn closing(state: WorkflowState) -> Option<Self> {
        match state {
            WorkflowState::Running => None,
            WorkflowState::Completed => Some(EventType::WorkflowExecutionCompleted),
            WorkflowState::Failed => Some(EventType::WorkflowExecutionFailed),
            WorkflowState::Terminated => Some(EventType::WorkflowExecutionTerminated),
            WorkflowState::Canceled => Some(EventType::WorkflowExecutionCanceled),
            WorkflowState::TimedOut => Some(EventType::WorkflowExecutionTimedOut),
        }
    }
}

/// One entry of a workflow's append-only trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvent {
    /// Position in the log, starting at 1.
    pub event_id: u64,
    /// The time the event was appended
    pub time: DateTime<Utc>,
    /// The kind of event
    pub event: EventType,
    /// The event payload
    #[serde(default)]
    pub data: serde_json::Value,
}

/// One page of history, as returned by a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub events: Vec<HistoryEvent>,
    /// Token for the next page; `None` when the log has been read to its
    /// current end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<u64>,
}
