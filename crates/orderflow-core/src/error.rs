//! Error types for activities, the durable store and the workflow engine.

use crate::activity::ActivityName;
use crate::history::{WorkflowId, WorkflowState};
use std::time::Duration;
use thiserror::Error;

/// Failure of a single activity attempt.
///
/// Every variant is retryable; the executor does not distinguish causes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ActivityError {
    /// The activity reported an error.
    #[error("Activity failed: {activity}, details: {details}")]
    Failed {
        /// The activity that failed
        activity: ActivityName,
        /// Details about the failure
        details: String,
    },

    /// The attempt exceeded its start-to-close timeout.
    #[error("Activity {activity} timed out after {timeout:?}")]
    Timeout {
        /// The activity that timed out
        activity: ActivityName,
        /// The timeout that was exceeded
        timeout: Duration,
    },
}

impl ActivityError {
    /// Shorthand for [`ActivityError::Failed`].
    pub fn failed(activity: impl Into<ActivityName>, details: impl Into<String>) -> Self {
        ActivityError::Failed {
            activity: activity.into(),
            details: details.into(),
        }
    }

    /// The activity this error belongs to.
    pub fn activity(&self) -> &ActivityName {
        match self {
            ActivityError::Failed { activity, .. } | ActivityError::Timeout { activity, .. } => {
                activity
            }
        }
    }
}

/// Errors raised by a durable store backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    /// No workflow with the given id.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    /// A workflow with this id was already created.
    #[error("workflow already exists: {0}")]
    AlreadyExists(WorkflowId),

    /// The workflow already holds a terminal state.
    #[error("workflow {id} is already {state}")]
    AlreadyTerminal {
        /// The workflow id
        id: WorkflowId,
        /// The terminal state it holds
        state: WorkflowState,
    },

    /// A backend-specific error (connection, serialization, ...).
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors returned to callers of the workflow engine.
///
/// A workflow that ends in `FAILED` is not an error at this level; it is a
/// normal status. These variants cover bad requests, unknown ids and
/// infrastructure problems.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WorkflowError {
    /// The submitted order request is malformed.
    #[error("Invalid order request: {0}")]
    InvalidRequest(String),

    /// No workflow with the given id.
    #[error("Workflow not found: {0}")]
    NotFound(WorkflowId),

    /// The workflow is already terminal and cannot be changed.
    #[error("Workflow {id} is already {state}")]
    AlreadyTerminal {
        /// The workflow id
        id: WorkflowId,
        /// Its terminal state
        state: WorkflowState,
    },

    /// Recorded history does not match what the orchestrator expects.
    #[error("Nondeterminism detected: {0}")]
    Nondeterminism(String),

    /// The durable store failed.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::WorkflowNotFound(id) => WorkflowError::NotFound(id),
            StoreError::AlreadyTerminal { id, state } => WorkflowError::AlreadyTerminal { id, state },
            other => WorkflowError::Store(other),
        }
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        WorkflowError::Store(StoreError::Backend(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_error_display() {
        let error = ActivityError::failed("processPayment", "Payment processing failed");
        assert_eq!(
            error.to_string(),
            "Activity failed: processPayment, details: Payment processing failed"
        );

        let timeout_error = ActivityError::Timeout {
            activity: ActivityName::new("checkInventory"),
            timeout: Duration::from_secs(10),
        };
        assert_eq!(
            timeout_error.to_string(),
            "Activity checkInventory timed out after 10s"
        );
        assert_eq!(timeout_error.activity(), "checkInventory");
    }

    #[test]
    fn test_store_error_maps_to_workflow_error() {
        let id = WorkflowId::new("order-1");
        let err: WorkflowError = StoreError::WorkflowNotFound(id.clone()).into();
        assert!(matches!(err, WorkflowError::NotFound(ref got) if *got == id));

        let err: WorkflowError = StoreError::AlreadyTerminal {
            id: id.clone(),
            state: WorkflowState::Completed,
        }
        .into();
        assert_eq!(err.to_string(), "Workflow order-1 is already COMPLETED");

        let err: WorkflowError = StoreError::Backend("disk full".to_string()).into();
        assert!(matches!(err, WorkflowError::Store(StoreError::Backend(_))));
    }
}
