use async_trait::async_trait;
use chrono::Utc;
use orderflow::activities::add_business_days;
use orderflow::config::WorkflowConfig;
use orderflow::prelude::*;
use orderflow::{
    ActivityName, Closing, FailureCode, HistoryPage, StoreError, WorkflowRecord, WorkflowStore,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn order(product_id: &str, quantity: u32, address: &str) -> OrderRequest {
    OrderRequest {
        product_id: product_id.to_string(),
        quantity,
        customer_id: "cust-123".to_string(),
        customer_address: address.to_string(),
    }
}

fn engine(faults: ScriptedFaults) -> OrderEngine {
    engine_on(Arc::new(InMemoryStore::new()), faults, WorkflowConfig::default())
}

fn engine_on(
    store: Arc<dyn WorkflowStore>,
    faults: ScriptedFaults,
    settings: WorkflowConfig,
) -> OrderEngine {
    let activities = Activities::new(Arc::new(Catalog::demo()), Arc::new(faults));
    OrderEngine::new(store, activities, settings)
}

/// In-memory store that can lose one activity completion or close a
/// workflow right before a cancel request is appended.
#[derive(Default)]
struct FaultyStore {
    inner: InMemoryStore,
    lose_completion_of: Mutex<Option<&'static str>>,
    close_on_cancel_request: bool,
}

#[async_trait]
impl WorkflowStore for FaultyStore {
    async fn create(&self, record: WorkflowRecord) -> Result<(), StoreError> {
        self.inner.create(record).await
    }

    async fn get(&self, id: &WorkflowId) -> Result<WorkflowRecord, StoreError> {
        self.inner.get(id).await
    }

    async fn save_progress(&self, id: &WorkflowId, result: &OrderResult) -> Result<(), StoreError> {
        self.inner.save_progress(id, result).await
    }

    async fn finish(&self, id: &WorkflowId, closing: Closing) -> Result<WorkflowRecord, StoreError> {
        self.inner.finish(id, closing).await
    }

    async fn append_event(
        &self,
        id: &WorkflowId,
        event: EventType,
        data: Value,
    ) -> Result<HistoryEvent, StoreError> {
        if event == EventType::ActivityTaskCompleted {
            let mut target = self.lose_completion_of.lock().unwrap();
            if target.is_some_and(|activity| data["activity"] == activity) {
                *target = None;
                return Err(StoreError::Backend("write lost".to_string()));
            }
        }
        if self.close_on_cancel_request && event == EventType::WorkflowExecutionCancelRequested {
            let closing = Closing {
                state: WorkflowState::Completed,
                result: None,
                failure: None,
                data: json!({}),
            };
            let _ = self.inner.finish(id, closing).await;
        }
        self.inner.append_event(id, event, data).await
    }

    async fn read_history(
        &self,
        id: &WorkflowId,
        from: Option<u64>,
        page_size: usize,
    ) -> Result<HistoryPage, StoreError> {
        self.inner.read_history(id, from, page_size).await
    }

    async fn list_running(&self) -> Result<Vec<WorkflowId>, StoreError> {
        self.inner.list_running().await
    }
}

fn count_events(history: &[HistoryEvent], event: EventType, activity: &str) -> usize {
    history
        .iter()
        .filter(|e| e.event == event && e.data["activity"] == activity)
        .count()
}

async fn wait_for_inventory(engine: &OrderEngine, id: &WorkflowId) {
    while assert_ok!(engine.status(id).await).result.is_none() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn run_to_end(engine: &OrderEngine, request: OrderRequest) -> (WorkflowId, StatusResponse) {
    let id = assert_ok!(engine.submit(request).await);
    let status = assert_ok!(engine.wait_for_completion(&id).await);
    (id, status)
}

#[tokio::test(start_paused = true)]
async fn test_out_of_stock_completes_without_payment() {
    let engine = engine(ScriptedFaults::always_succeed());
    let (_, status) = run_to_end(&engine, order("prod-003", 1, "1 Main St")).await;

    assert_eq!(status.status, WorkflowState::Completed);
    let result = status.result.unwrap();
    assert!(!result.inventory.available);
    assert!(result.payment.is_none());
    assert!(result.shipping.is_none());
    assert!(result.error_message.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_successful_order_totals() {
    let engine = engine(ScriptedFaults::always_succeed().delivering_in(3));
    let today = Utc::now().date_naive();
    let (_, status) = run_to_end(&engine, order("prod-001", 2, "123 Main Street")).await;

    assert_eq!(status.status, WorkflowState::Completed);
    let result = status.result.unwrap();
    assert!(result.inventory.available);
    assert_eq!(result.inventory.reserved_quantity, 2);

    let payment = result.payment.unwrap();
    assert!(payment.payment_successful);
    assert_eq!(payment.total_amount, Decimal::new(3998, 2));
    assert!(!payment.transaction_id.is_empty());

    let shipping = result.shipping.unwrap();
    assert_eq!(shipping.shipping_cost, Decimal::new(799, 2));
    assert_eq!(shipping.final_total, Decimal::new(4797, 2));
    assert!(shipping.estimated_delivery >= add_business_days(today, 3));
    assert!(result.error_message.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_remote_address_doubles_distance_factor() {
    let engine = engine(ScriptedFaults::always_succeed());
    let (_, status) = run_to_end(&engine, order("prod-001", 2, "Remote farm road 7")).await;

    assert_eq!(status.status, WorkflowState::Completed);
    let shipping = status.result.unwrap().shipping.unwrap();
    assert_eq!(shipping.shipping_cost, Decimal::new(1099, 2));
    assert_eq!(shipping.final_total, Decimal::new(5097, 2));
}

#[tokio::test(start_paused = true)]
async fn test_payment_failure_after_three_attempts() {
    let engine = engine(ScriptedFaults::always_fail());
    let (id, status) = run_to_end(&engine, order("prod-001", 2, "123 Main Street")).await;

    assert_eq!(status.status, WorkflowState::Failed);
    let result = status.result.unwrap();
    assert!(result.inventory.available);
    assert!(result.payment.is_none());
    assert!(result.shipping.is_none());
    let reason = result.error_message.unwrap();
    assert_eq!(reason.code, FailureCode::RetriesExhausted);
    assert_eq!(reason.activity, Some(ActivityName::new("processPayment")));

    let history = assert_ok!(engine.history(&id).await);
    let payment_attempts = history
        .iter()
        .filter(|e| e.event == EventType::ActivityTaskScheduled)
        .filter(|e| e.data["activity"] == "processPayment")
        .count();
    assert_eq!(payment_attempts, 3);
    assert!(history
        .iter()
        .all(|e| e.data["activity"] != "calculateShipping"));
    assert_eq!(
        history.last().map(|e| e.event),
        Some(EventType::WorkflowExecutionFailed)
    );
}

#[tokio::test(start_paused = true)]
async fn test_payment_recovers_within_retry_budget() {
    let engine = engine(ScriptedFaults::with_payments([false, false]));
    let (_, status) = run_to_end(&engine, order("prod-005", 1, "123 Main Street")).await;

    assert_eq!(status.status, WorkflowState::Completed);
    let result = status.result.unwrap();
    assert_eq!(result.payment.unwrap().total_amount, Decimal::new(9900, 2));
    assert!(result.shipping.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_product_is_unavailable() {
    let engine = engine(ScriptedFaults::always_succeed());
    let (_, status) = run_to_end(&engine, order("prod-999", 1, "123 Main Street")).await;

    assert_eq!(status.status, WorkflowState::Completed);
    let inventory = status.result.unwrap().inventory;
    assert!(!inventory.available);
    assert_eq!(inventory.unit_price, Decimal::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_terminal_queries_are_idempotent() {
    let engine = engine(ScriptedFaults::always_succeed());
    let (id, status) = run_to_end(&engine, order("prod-004", 3, "123 Main Street")).await;

    assert_eq!(assert_ok!(engine.status(&id).await), status);
    assert_eq!(assert_ok!(engine.status(&id).await), status);

    let first = assert_ok!(engine.history(&id).await);
    let second = assert_ok!(engine.history(&id).await);
    assert_eq!(first, second);
}

#[tokio::test(start_paused = true)]
async fn test_history_is_ordered_and_complete() {
    let settings = WorkflowConfig {
        history_page_size: 2,
        ..WorkflowConfig::default()
    };
    let engine = engine_on(
        Arc::new(InMemoryStore::new()),
        ScriptedFaults::always_succeed(),
        settings,
    );
    let (id, _) = run_to_end(&engine, order("prod-001", 1, "123 Main Street")).await;

    let history = assert_ok!(engine.history(&id).await);
    assert_eq!(history.len(), 8);
    assert_eq!(history[0].event, EventType::WorkflowExecutionStarted);
    assert_eq!(
        history.last().map(|e| e.event),
        Some(EventType::WorkflowExecutionCompleted)
    );
    assert!(history
        .windows(2)
        .all(|w| w[0].event_id + 1 == w[1].event_id && w[0].time <= w[1].time));

    let scheduled: Vec<&str> = history
        .iter()
        .filter(|e| e.event == EventType::ActivityTaskScheduled)
        .filter_map(|e| e.data["activity"].as_str())
        .collect();
    assert_eq!(
        scheduled,
        vec!["checkInventory", "processPayment", "calculateShipping"]
    );

    let page = assert_ok!(engine.history_page(&id, None).await);
    assert_eq!(page.events.len(), 2);
    assert_eq!(page.next_page_token, Some(3));
    let page = assert_ok!(engine.history_page(&id, Some(7)).await);
    assert_eq!(page.events.len(), 2);
    assert_eq!(page.next_page_token, None);
}

#[tokio::test(start_paused = true)]
async fn test_history_only_grows_while_running() {
    let engine = engine(ScriptedFaults::with_payments([false, false]));
    let id = assert_ok!(engine.submit(order("prod-001", 1, "123 Main Street")).await);

    tokio::task::yield_now().await;
    let early = assert_ok!(engine.history(&id).await);
    let running = assert_ok!(engine.status(&id).await);
    assert_eq!(running.status, WorkflowState::Running);

    assert_ok!(engine.wait_for_completion(&id).await);
    let late = assert_ok!(engine.history(&id).await);
    assert!(late.len() > early.len());
    assert_eq!(&late[..early.len()], &early[..]);
}

#[tokio::test(start_paused = true)]
async fn test_terminate_keeps_partial_result() {
    let engine = engine(ScriptedFaults::always_fail());
    let id = assert_ok!(engine.submit(order("prod-001", 2, "123 Main Street")).await);
    wait_for_inventory(&engine, &id).await;

    let status = assert_ok!(engine.terminate(&id, "operator request").await);
    assert_eq!(status.status, WorkflowState::Terminated);
    let result = status.result.unwrap();
    assert!(result.inventory.available);
    assert_eq!(result.inventory.reserved_quantity, 2);
    assert!(result.payment.is_none());
    assert!(result.shipping.is_none());

    let history = assert_ok!(engine.history(&id).await);
    let last = history.last().unwrap();
    assert_eq!(last.event, EventType::WorkflowExecutionTerminated);
    assert_eq!(last.data["reason"], "operator request");

    assert_err!(engine.cancel(&id).await);
    assert_err!(engine.terminate(&id, "again").await);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_records_request() {
    let engine = engine(ScriptedFaults::always_fail());
    let id = assert_ok!(engine.submit(order("prod-001", 1, "123 Main Street")).await);
    wait_for_inventory(&engine, &id).await;

    let status = assert_ok!(engine.cancel(&id).await);
    assert_eq!(status.status, WorkflowState::Canceled);
    assert_eq!(status.result.unwrap().inventory.reserved_quantity, 1);

    let events: Vec<EventType> = assert_ok!(engine.history(&id).await)
        .into_iter()
        .map(|e| e.event)
        .collect();
    assert!(events.contains(&EventType::WorkflowExecutionCancelRequested));
    assert_eq!(events.last(), Some(&EventType::WorkflowExecutionCanceled));
}

#[tokio::test(start_paused = true)]
async fn test_execution_timeout_closes_workflow() {
    let settings = WorkflowConfig {
        execution_timeout_secs: Some(1),
        ..WorkflowConfig::default()
    };
    let engine = engine_on(
        Arc::new(InMemoryStore::new()),
        ScriptedFaults::always_fail(),
        settings,
    );
    let (id, status) = run_to_end(&engine, order("prod-001", 1, "123 Main Street")).await;

    assert_eq!(status.status, WorkflowState::TimedOut);
    let history = assert_ok!(engine.history(&id).await);
    assert_eq!(
        history.last().map(|e| e.event),
        Some(EventType::WorkflowExecutionTimedOut)
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_orders_never_oversell() {
    let engine = engine(ScriptedFaults::always_succeed());

    let mut ids = Vec::new();
    for _ in 0..10 {
        ids.push(assert_ok!(engine.submit(order("prod-002", 2, "123 Main Street")).await));
    }

    let mut reserved = 0;
    for id in &ids {
        let status = assert_ok!(engine.wait_for_completion(id).await);
        assert_eq!(status.status, WorkflowState::Completed);
        let result = status.result.unwrap();
        if result.inventory.available {
            assert!(result.shipping.is_some());
            reserved += result.inventory.reserved_quantity;
        } else {
            assert!(result.payment.is_none());
        }
    }

    assert_eq!(reserved, 10);
    assert_eq!(engine.activities().inventory.catalog().stock("prod-002"), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_resume_replays_recorded_inventory() {
    let store = Arc::new(InMemoryStore::new());
    let id = WorkflowId::new("order-recovered");
    let request = order("prod-001", 2, "123 Main Street");

    store
        .create(WorkflowRecord::running(id.clone(), request.clone(), Utc::now()))
        .await
        .unwrap();
    let seeded = [
        (EventType::WorkflowExecutionStarted, json!({ "input": request })),
        (
            EventType::ActivityTaskScheduled,
            json!({ "activity": "checkInventory", "attempt": 1, "input": {} }),
        ),
        (
            EventType::ActivityTaskCompleted,
            json!({
                "activity": "checkInventory",
                "attempt": 1,
                "result": { "available": true, "reservedQuantity": 2, "unitPrice": "19.99" }
            }),
        ),
        (
            EventType::ActivityTaskScheduled,
            json!({ "activity": "processPayment", "attempt": 1, "input": {} }),
        ),
    ];
    for (event, data) in seeded {
        store.append_event(&id, event, data).await.unwrap();
    }

    let engine = engine_on(
        store.clone(),
        ScriptedFaults::always_succeed(),
        WorkflowConfig::default(),
    );
    let resumed = assert_ok!(engine.resume_incomplete().await);
    assert_eq!(resumed, vec![id.clone()]);

    let status = assert_ok!(engine.wait_for_completion(&id).await);
    assert_eq!(status.status, WorkflowState::Completed);
    let result = status.result.unwrap();
    assert_eq!(result.payment.unwrap().total_amount, Decimal::new(3998, 2));
    assert_eq!(result.shipping.unwrap().final_total, Decimal::new(4797, 2));

    // inventory came from history, so the catalog was not touched again
    assert_eq!(engine.activities().inventory.catalog().stock("prod-001"), Some(50));
}

#[tokio::test(start_paused = true)]
async fn test_resume_rejects_mismatched_history() {
    let store = Arc::new(InMemoryStore::new());
    let id = WorkflowId::new("order-corrupt");
    store
        .create(WorkflowRecord::running(
            id.clone(),
            order("prod-001", 1, "123 Main Street"),
            Utc::now(),
        ))
        .await
        .unwrap();
    store
        .append_event(
            &id,
            EventType::ActivityTaskCompleted,
            json!({
                "activity": "calculateShipping",
                "attempt": 1,
                "result": { "shippingCost": "7.99", "estimatedDelivery": "2024-05-09", "finalTotal": "47.97" }
            }),
        )
        .await
        .unwrap();

    let engine = engine_on(store, ScriptedFaults::always_succeed(), WorkflowConfig::default());
    let resumed = assert_ok!(engine.resume_incomplete().await);
    assert!(resumed.is_empty());
    assert_eq!(
        assert_ok!(engine.status(&id).await).status,
        WorkflowState::Running
    );
}

#[tokio::test]
async fn test_unknown_id_and_invalid_requests() {
    let engine = engine(ScriptedFaults::always_succeed());
    let missing = WorkflowId::new("order-missing");

    assert!(matches!(
        engine.status(&missing).await,
        Err(WorkflowError::NotFound(_))
    ));
    assert!(matches!(
        engine.history(&missing).await,
        Err(WorkflowError::NotFound(_))
    ));
    assert!(matches!(
        engine.cancel(&missing).await,
        Err(WorkflowError::NotFound(_))
    ));
    assert!(matches!(
        engine.submit(order("prod-001", 0, "123 Main Street")).await,
        Err(WorkflowError::InvalidRequest(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_resume_keeps_retry_budget() {
    let store = Arc::new(InMemoryStore::new());
    let id = WorkflowId::new("order-retrying");
    let request = order("prod-001", 2, "123 Main Street");
    store
        .create(WorkflowRecord::running(id.clone(), request.clone(), Utc::now()))
        .await
        .unwrap();

    let declined = json!({
        "code": "RETRIES_EXHAUSTED",
        "activity": "processPayment",
        "message": "Payment processing failed"
    });
    let mut seeded = vec![
        (EventType::WorkflowExecutionStarted, json!({ "input": request })),
        (
            EventType::ActivityTaskScheduled,
            json!({ "activity": "checkInventory", "attempt": 1, "input": {} }),
        ),
        (
            EventType::ActivityTaskCompleted,
            json!({
                "activity": "checkInventory",
                "attempt": 1,
                "result": { "available": true, "reservedQuantity": 2, "unitPrice": "19.99" }
            }),
        ),
    ];
    for attempt in 1..=2 {
        seeded.push((
            EventType::ActivityTaskScheduled,
            json!({ "activity": "processPayment", "attempt": attempt, "input": {} }),
        ));
        seeded.push((
            EventType::ActivityTaskFailed,
            json!({ "activity": "processPayment", "attempt": attempt, "willRetry": true, "failure": declined }),
        ));
    }
    for (event, data) in seeded {
        store.append_event(&id, event, data).await.unwrap();
    }

    let engine = engine_on(
        store,
        ScriptedFaults::always_fail(),
        WorkflowConfig::default(),
    );
    assert_eq!(assert_ok!(engine.resume_incomplete().await), vec![id.clone()]);

    let status = assert_ok!(engine.wait_for_completion(&id).await);
    assert_eq!(status.status, WorkflowState::Failed);
    assert!(status.result.unwrap().error_message.is_some());

    let history = assert_ok!(engine.history(&id).await);
    assert_eq!(
        count_events(&history, EventType::ActivityTaskScheduled, "processPayment"),
        3
    );
    let last_attempt = history
        .iter()
        .rev()
        .find(|e| e.event == EventType::ActivityTaskFailed)
        .unwrap();
    assert_eq!(last_attempt.data["attempt"], 3);
    assert_eq!(last_attempt.data["willRetry"], false);
}

#[tokio::test(start_paused = true)]
async fn test_lost_history_write_leaves_workflow_resumable() {
    let store = Arc::new(FaultyStore {
        lose_completion_of: Mutex::new(Some("processPayment")),
        ..FaultyStore::default()
    });
    let engine = engine_on(
        store,
        ScriptedFaults::always_succeed(),
        WorkflowConfig::default(),
    );
    let id = assert_ok!(engine.submit(order("prod-001", 2, "123 Main Street")).await);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let status = assert_ok!(engine.status(&id).await);
    assert_eq!(status.status, WorkflowState::Running);
    assert!(status.result.unwrap().payment.is_none());
    let history = assert_ok!(engine.history(&id).await);
    assert_eq!(
        count_events(&history, EventType::ActivityTaskCompleted, "processPayment"),
        0
    );

    assert_eq!(assert_ok!(engine.resume_incomplete().await), vec![id.clone()]);
    let status = assert_ok!(engine.wait_for_completion(&id).await);
    assert_eq!(status.status, WorkflowState::Completed);
    assert!(status.result.unwrap().payment.is_some());

    let history = assert_ok!(engine.history(&id).await);
    assert_eq!(
        count_events(&history, EventType::ActivityTaskCompleted, "processPayment"),
        1
    );
    assert_eq!(
        count_events(&history, EventType::ActivityTaskScheduled, "processPayment"),
        2
    );
}

#[tokio::test]
async fn test_cancel_after_close_returns_recorded_status() {
    let store = Arc::new(FaultyStore {
        close_on_cancel_request: true,
        ..FaultyStore::default()
    });
    let id = WorkflowId::new("order-closing");
    store
        .create(WorkflowRecord::running(
            id.clone(),
            order("prod-001", 1, "123 Main Street"),
            Utc::now(),
        ))
        .await
        .unwrap();
    let engine = engine_on(
        store,
        ScriptedFaults::always_succeed(),
        WorkflowConfig::default(),
    );

    let status = assert_ok!(engine.cancel(&id).await);
    assert_eq!(status.status, WorkflowState::Completed);
    assert_err!(engine.cancel(&id).await);
}
