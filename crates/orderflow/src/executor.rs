//! Runs activities under their timeout and retry policy, recording every
//! attempt in the workflow history.

use orderflow_core::{
    Activity, ActivityError, ActivityName, EventType, FailureReason, RetryPolicy, StoreError,
    WorkflowId, WorkflowStore,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Appends history events for one workflow.
#[derive(Clone)]
pub struct HistoryRecorder {
    id: WorkflowId,
    store: Arc<dyn WorkflowStore>,
}

impl fmt::Debug for HistoryRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryRecorder")
            .field("id", &self.id)
            .finish()
    }
}

impl HistoryRecorder {
    pub fn new(id: WorkflowId, store: Arc<dyn WorkflowStore>) -> Self {
        Self { id, store }
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        &self.id
    }

    /// Appends an event. A closed workflow silently drops late events; any
    /// other store error is returned.
    pub async fn record(&self, event: EventType, data: Value) -> Result<(), StoreError> {
        match self.store.append_event(&self.id, event, data).await {
            Ok(_) => Ok(()),
            Err(StoreError::AlreadyTerminal { state, .. }) => {
                debug!(workflow_id = %self.id, ?event, %state, "dropping event for closed workflow");
                Ok(())
            }
            Err(e) => {
                warn!(workflow_id = %self.id, ?event, "failed to record history event: {}", e);
                Err(e)
            }
        }
    }
}

/// Terminal failure of an activity after its last permitted attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityFailure {
    /// Attempts made, first call included.
    pub attempts: u32,
    /// Error of the final attempt.
    pub error: ActivityError,
}

impl ActivityFailure {
    pub fn reason(&self) -> FailureReason {
        FailureReason::from_last_attempt(&self.error)
    }
}

impl fmt::Display for ActivityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (after {} attempts)", self.error, self.attempts)
    }
}

impl std::error::Error for ActivityFailure {}

fn to_json(value: &impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        warn!("failed to serialize history payload: {}", e);
        Value::Null
    })
}

/// Executes activities with bounded retries.
///
/// Any error, including a start-to-close timeout, is retried until the
/// policy's attempt limit is reached. The outer `Result` reports history that
/// could not be written; the run must not continue past an unrecorded outcome.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    recorder: HistoryRecorder,
}

impl RetryExecutor {
    pub fn new(recorder: HistoryRecorder) -> Self {
        Self { recorder }
    }

    pub async fn run<A: Activity>(
        &self,
        activity: &A,
        input: &A::Input,
    ) -> Result<Result<A::Output, ActivityFailure>, StoreError> {
        self.resume(activity, input, 0).await
    }

    /// Continues an activity that already used `attempts_used` attempts.
    ///
    /// When no attempt is left the activity is not called again and the
    /// interrupted attempt is recorded as its final failure.
    pub async fn resume<A: Activity>(
        &self,
        activity: &A,
        input: &A::Input,
        attempts_used: u32,
    ) -> Result<Result<A::Output, ActivityFailure>, StoreError> {
        let name = activity.name();
        let options = activity.options();
        let max_attempts = options.retry_policy.max_attempts();
        let input_json = to_json(input);

        if attempts_used >= max_attempts {
            let error = ActivityError::failed(
                name.clone(),
                format!("attempt {} was interrupted and no retries remain", attempts_used),
            );
            self.recorder
                .record(
                    EventType::ActivityTaskFailed,
                    json!({
                        "activity": name,
                        "attempt": attempts_used,
                        "willRetry": false,
                        "failure": FailureReason::from_last_attempt(&error),
                    }),
                )
                .await?;
            warn!(
                workflow_id = %self.recorder.workflow_id(),
                activity = %name,
                attempts = attempts_used,
                "Activity has no attempts left after recovery"
            );
            return Ok(Err(ActivityFailure {
                attempts: attempts_used,
                error,
            }));
        }
        if attempts_used > 0 {
            if let Some(delay) = options.retry_policy.delay_for_attempt(attempts_used - 1) {
                tokio::time::sleep(delay).await;
            }
        }

        let mut attempt = attempts_used;
        loop {
            attempt += 1;
            self.recorder
                .record(
                    EventType::ActivityTaskScheduled,
                    json!({ "activity": name, "attempt": attempt, "input": input_json }),
                )
                .await?;

            let error = match timeout(options.start_to_close_timeout, activity.execute(input)).await
            {
                Ok(Ok(output)) => {
                    self.recorder
                        .record(
                            EventType::ActivityTaskCompleted,
                            json!({ "activity": name, "attempt": attempt, "result": to_json(&output) }),
                        )
                        .await?;
                    info!(
                        workflow_id = %self.recorder.workflow_id(),
                        activity = %name,
                        attempt,
                        "Activity completed successfully"
                    );
                    return Ok(Ok(output));
                }
                Ok(Err(e)) => e,
                Err(_) => ActivityError::Timeout {
                    activity: name.clone(),
                    timeout: options.start_to_close_timeout,
                },
            };

            let will_retry = attempt < max_attempts;
            let event = match error {
                ActivityError::Timeout { .. } => EventType::ActivityTaskTimedOut,
                _ => EventType::ActivityTaskFailed,
            };
            self.recorder
                .record(
                    event,
                    json!({
                        "activity": name,
                        "attempt": attempt,
                        "willRetry": will_retry,
                        "failure": FailureReason::from_last_attempt(&error),
                    }),
                )
                .await?;

            if will_retry {
                self.log_and_wait_for_retry(&name, &options.retry_policy, attempt, &error)
                    .await;
                continue;
            }

            warn!(
                workflow_id = %self.recorder.workflow_id(),
                activity = %name,
                attempts = attempt,
                "Activity failed after final attempt: {}",
                error
            );
            return Ok(Err(ActivityFailure {
                attempts: attempt,
                error,
            }));
        }
    }

    async fn log_and_wait_for_retry(
        &self,
        name: &ActivityName,
        policy: &RetryPolicy,
        attempt: u32,
        error: &ActivityError,
    ) {
        info!(
            workflow_id = %self.recorder.workflow_id(),
            activity = %name,
            "Activity attempt failed ({}), retrying ({}/{})",
            error,
            attempt + 1,
            policy.max_attempts()
        );
        if let Some(delay) = policy.delay_for_attempt(attempt - 1) {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::InMemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use orderflow_core::{ActivityOptions, FailureCode, OrderRequest, WorkflowRecord};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Flaky {
        failures_before_success: u32,
        calls: AtomicU32,
        options: ActivityOptions,
    }

    impl Flaky {
        fn new(failures_before_success: u32, max_attempts: u32) -> Self {
            Self {
                failures_before_success,
                calls: AtomicU32::new(0),
                options: ActivityOptions {
                    start_to_close_timeout: Duration::from_secs(10),
                    retry_policy: RetryPolicy::exponential(max_attempts, Duration::from_secs(1)),
                },
            }
        }
    }

    #[async_trait]
    impl Activity for Flaky {
        type Input = u32;
        type Output = u32;

        async fn execute(&self, input: &u32) -> Result<u32, ActivityError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures_before_success {
                return Err(ActivityError::failed("flaky", format!("failure {}", call)));
            }
            Ok(input + 1)
        }

        fn name(&self) -> ActivityName {
            ActivityName::new("flaky")
        }

        fn options(&self) -> ActivityOptions {
            self.options.clone()
        }
    }

    struct Hanging;

    #[async_trait]
    impl Activity for Hanging {
        type Input = ();
        type Output = ();

        async fn execute(&self, _input: &()) -> Result<(), ActivityError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }

        fn name(&self) -> ActivityName {
            ActivityName::new("hanging")
        }

        fn options(&self) -> ActivityOptions {
            ActivityOptions {
                start_to_close_timeout: Duration::from_secs(10),
                retry_policy: RetryPolicy::fixed(3, Duration::from_secs(1)),
            }
        }
    }

    async fn executor() -> (RetryExecutor, Arc<InMemoryStore>, WorkflowId) {
        let store = Arc::new(InMemoryStore::new());
        let id = WorkflowId::new("order-test");
        store
            .create(WorkflowRecord::running(
                id.clone(),
                OrderRequest {
                    product_id: "prod-001".to_string(),
                    quantity: 1,
                    customer_id: "cust-1".to_string(),
                    customer_address: "1 Main St".to_string(),
                },
                Utc::now(),
            ))
            .await
            .unwrap();
        let recorder = HistoryRecorder::new(id.clone(), store.clone());
        (RetryExecutor::new(recorder), store, id)
    }

    async fn event_types(store: &InMemoryStore, id: &WorkflowId) -> Vec<EventType> {
        store
            .read_history(id, None, 100)
            .await
            .unwrap()
            .events
            .into_iter()
            .map(|e| e.event)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_retries() {
        let (executor, store, id) = executor().await;
        let activity = Flaky::new(2, 3);
        let started = tokio::time::Instant::now();

        let output = executor.run(&activity, &41).await;

        assert_eq!(output, Ok(Ok(42)));
        assert_eq!(activity.calls.load(Ordering::SeqCst), 3);
        // backoff: 1s then 2s
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(
            event_types(&store, &id).await,
            vec![
                EventType::ActivityTaskScheduled,
                EventType::ActivityTaskFailed,
                EventType::ActivityTaskScheduled,
                EventType::ActivityTaskFailed,
                EventType::ActivityTaskScheduled,
                EventType::ActivityTaskCompleted,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts() {
        let (executor, store, id) = executor().await;
        let activity = Flaky::new(10, 3);

        let failure = executor.run(&activity, &1).await.unwrap().unwrap_err();

        assert_eq!(failure.attempts, 3);
        assert_eq!(activity.calls.load(Ordering::SeqCst), 3);
        assert_eq!(failure.reason().code, FailureCode::RetriesExhausted);

        let events = store.read_history(&id, None, 100).await.unwrap().events;
        let last = events.last().unwrap();
        assert_eq!(last.event, EventType::ActivityTaskFailed);
        assert_eq!(last.data["willRetry"], false);
        assert_eq!(last.data["attempt"], 3);
        assert_eq!(events[1].data["willRetry"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failed_attempt() {
        let (executor, store, id) = executor().await;
        let started = tokio::time::Instant::now();

        let failure = executor.run(&Hanging, &()).await.unwrap().unwrap_err();

        assert_eq!(failure.attempts, 3);
        assert!(matches!(failure.error, ActivityError::Timeout { .. }));
        assert_eq!(failure.reason().code, FailureCode::StartToCloseTimeout);
        // three 10s timeouts plus two 1s delays
        assert!(started.elapsed() >= Duration::from_secs(32));
        assert_eq!(
            event_types(&store, &id).await.last(),
            Some(&EventType::ActivityTaskTimedOut)
        );
    }

    #[tokio::test]
    async fn test_single_attempt_policy() {
        let (executor, _store, _id) = executor().await;
        let mut activity = Flaky::new(1, 1);
        activity.options.retry_policy = RetryPolicy::None;

        let failure = executor.run(&activity, &1).await.unwrap().unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert_eq!(failure.to_string(), "Activity failed: flaky, details: failure 1 (after 1 attempts)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_uses_remaining_attempts() {
        let (executor, store, id) = executor().await;
        let activity = Flaky::new(10, 3);

        let failure = executor.resume(&activity, &1, 2).await.unwrap().unwrap_err();

        assert_eq!(failure.attempts, 3);
        assert_eq!(activity.calls.load(Ordering::SeqCst), 1);
        let events = store.read_history(&id, None, 100).await.unwrap().events;
        assert_eq!(events[0].data["attempt"], 3);
        assert_eq!(events.last().unwrap().data["willRetry"], false);
    }

    #[tokio::test]
    async fn test_resume_without_attempts_left() {
        let (executor, store, id) = executor().await;
        let activity = Flaky::new(0, 3);

        let failure = executor.resume(&activity, &1, 3).await.unwrap().unwrap_err();

        assert_eq!(failure.attempts, 3);
        assert_eq!(activity.calls.load(Ordering::SeqCst), 0);
        assert_eq!(failure.reason().code, FailureCode::RetriesExhausted);
        assert_eq!(
            event_types(&store, &id).await,
            vec![EventType::ActivityTaskFailed]
        );
    }

    /// Store whose `append_event` fails for one event type.
    struct RejectingStore {
        inner: InMemoryStore,
        rejected: EventType,
    }

    #[async_trait]
    impl WorkflowStore for RejectingStore {
        async fn create(&self, record: WorkflowRecord) -> Result<(), StoreError> {
            self.inner.create(record).await
        }

        async fn get(&self, id: &WorkflowId) -> Result<WorkflowRecord, StoreError> {
            self.inner.get(id).await
        }

        async fn save_progress(
            &self,
            id: &WorkflowId,
            result: &orderflow_core::OrderResult,
        ) -> Result<(), StoreError> {
            self.inner.save_progress(id, result).await
        }

        async fn finish(
            &self,
            id: &WorkflowId,
            closing: orderflow_core::Closing,
        ) -> Result<WorkflowRecord, StoreError> {
            self.inner.finish(id, closing).await
        }

        async fn append_event(
            &self,
            id: &WorkflowId,
            event: EventType,
            data: Value,
        ) -> Result<orderflow_core::HistoryEvent, StoreError> {
            if event == self.rejected {
                return Err(StoreError::Backend("disk full".to_string()));
            }
            self.inner.append_event(id, event, data).await
        }

        async fn read_history(
            &self,
            id: &WorkflowId,
            from: Option<u64>,
            page_size: usize,
        ) -> Result<orderflow_core::HistoryPage, StoreError> {
            self.inner.read_history(id, from, page_size).await
        }

        async fn list_running(&self) -> Result<Vec<WorkflowId>, StoreError> {
            self.inner.list_running().await
        }
    }

    #[tokio::test]
    async fn test_unrecorded_completion_is_an_error() {
        let store = Arc::new(RejectingStore {
            inner: InMemoryStore::new(),
            rejected: EventType::ActivityTaskCompleted,
        });
        let id = WorkflowId::new("order-test");
        store
            .create(WorkflowRecord::running(
                id.clone(),
                OrderRequest {
                    product_id: "prod-001".to_string(),
                    quantity: 1,
                    customer_id: "cust-1".to_string(),
                    customer_address: "1 Main St".to_string(),
                },
                Utc::now(),
            ))
            .await
            .unwrap();
        let executor = RetryExecutor::new(HistoryRecorder::new(id, store));

        let result = executor.run(&Flaky::new(0, 3), &1).await;
        assert!(matches!(result, Err(StoreError::Backend(_))));
    }
}
