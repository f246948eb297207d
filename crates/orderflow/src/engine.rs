//! Runs order workflows on the tokio runtime and answers queries about them.
//!
//! Every submission gets its own driver task. The driver feeds activity
//! outcomes into an [`OrderOrchestrator`] and persists progress through the
//! [`WorkflowStore`], so status and history can be read at any time without
//! touching the driver.

use crate::activities::{Activities, Catalog};
use crate::config::{OrderflowConfig, WorkflowConfig};
use crate::executor::{HistoryRecorder, RetryExecutor};
use crate::faults::RandomFaults;
use crate::orchestrator::{
    attempts_in_flight, replay, resolutions_from_history, Command, OrderOrchestrator, Phase,
    Resolution,
};
use crate::projector::{collect_history, project_state, StatusResponse};
use chrono::Utc;
use config::ConfigError;
use orderflow_core::{
    Activity, Closing, EventType, FailureReason, HistoryEvent, HistoryPage, OrderRequest,
    OrderResult, StoreError, WorkflowError, WorkflowId, WorkflowRecord, WorkflowState,
    WorkflowStore,
};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Poll interval used when no live driver can be watched.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
enum StopRequest {
    Cancel,
    Terminate(String),
}

/// Shared between the engine and one driver task.
#[derive(Debug, Default)]
struct RunControl {
    token: CancellationToken,
    stop: Mutex<Option<StopRequest>>,
}

impl RunControl {
    /// Records why the run must stop and interrupts it. The first request wins.
    fn request(&self, stop: StopRequest) {
        {
            let mut slot = self.stop.lock().unwrap_or_else(|e| e.into_inner());
            slot.get_or_insert(stop);
        }
        self.token.cancel();
    }

    fn requested(&self) -> Option<StopRequest> {
        self.stop.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[derive(Debug)]
struct RunHandle {
    control: Arc<RunControl>,
    state: watch::Receiver<WorkflowState>,
}

type Runs = Arc<Mutex<HashMap<WorkflowId, RunHandle>>>;

fn lock_runs(runs: &Runs) -> MutexGuard<'_, HashMap<WorkflowId, RunHandle>> {
    runs.lock().unwrap_or_else(|e| e.into_inner())
}

/// Entry point for submitting, observing and stopping order workflows.
///
/// Cloning is cheap; clones share the store and the set of live runs.
#[derive(Clone)]
pub struct OrderEngine {
    store: Arc<dyn WorkflowStore>,
    activities: Arc<Activities>,
    settings: WorkflowConfig,
    runs: Runs,
}

impl fmt::Debug for OrderEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderEngine")
            .field("activities", &self.activities)
            .field("settings", &self.settings)
            .field("live_runs", &lock_runs(&self.runs).len())
            .finish()
    }
}

impl OrderEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        activities: Activities,
        settings: WorkflowConfig,
    ) -> Self {
        Self {
            store,
            activities: Arc::new(activities),
            settings,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Builds an engine whose activities draw faults from `rand`.
    pub fn from_config(
        config: &OrderflowConfig,
        store: Arc<dyn WorkflowStore>,
        catalog: Arc<Catalog>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let faults = Arc::new(RandomFaults::new(&config.faults));
        let activities = Activities::from_config(&config.activities, catalog, faults)?;
        Ok(Self::new(store, activities, config.workflow.clone()))
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub fn activities(&self) -> &Activities {
        &self.activities
    }

    /// Starts a workflow for `request` and returns its id without waiting.
    pub async fn submit(&self, request: OrderRequest) -> Result<WorkflowId, WorkflowError> {
        request.validate()?;

        let id = WorkflowId::new(format!("order-{}", Uuid::new_v4()));
        self.store
            .create(WorkflowRecord::running(id.clone(), request.clone(), Utc::now()))
            .await?;
        self.store
            .append_event(
                &id,
                EventType::WorkflowExecutionStarted,
                json!({ "input": serde_json::to_value(&request)? }),
            )
            .await?;
        info!(
            workflow_id = %id,
            product_id = %request.product_id,
            quantity = request.quantity,
            "Workflow started"
        );

        let mut orchestrator = OrderOrchestrator::new(request);
        let command = orchestrator.start()?;
        self.spawn(id.clone(), orchestrator, command, 0, self.settings.execution_timeout());
        Ok(id)
    }

    /// Current status. Never blocks on a running activity.
    pub async fn status(&self, id: &WorkflowId) -> Result<StatusResponse, WorkflowError> {
        Ok(self.store.get(id).await?.into())
    }

    /// The whole history, read page by page and concatenated.
    pub async fn history(&self, id: &WorkflowId) -> Result<Vec<HistoryEvent>, WorkflowError> {
        Ok(collect_history(self.store.as_ref(), id, self.settings.history_page_size).await?)
    }

    /// One page of history starting at `page_token` (`None` = first page).
    pub async fn history_page(
        &self,
        id: &WorkflowId,
        page_token: Option<u64>,
    ) -> Result<HistoryPage, WorkflowError> {
        Ok(self
            .store
            .read_history(id, page_token, self.settings.history_page_size)
            .await?)
    }

    /// Requests cancellation and waits until the workflow is closed.
    ///
    /// An outstanding activity is abandoned. The returned status may still be
    /// `COMPLETED` or `FAILED` if the run closed before the request landed.
    pub async fn cancel(&self, id: &WorkflowId) -> Result<StatusResponse, WorkflowError> {
        self.ensure_running(id).await?;
        match self
            .store
            .append_event(id, EventType::WorkflowExecutionCancelRequested, json!({}))
            .await
        {
            Ok(_) => {}
            // closed between the check and the append
            Err(StoreError::AlreadyTerminal { .. }) => return self.status(id).await,
            Err(e) => return Err(e.into()),
        }
        info!(workflow_id = %id, "Cancellation requested");
        self.stop(id, StopRequest::Cancel).await
    }

    /// Forcibly ends a workflow as `TERMINATED`.
    pub async fn terminate(
        &self,
        id: &WorkflowId,
        reason: impl Into<String>,
    ) -> Result<StatusResponse, WorkflowError> {
        self.ensure_running(id).await?;
        let reason = reason.into();
        info!(workflow_id = %id, %reason, "Termination requested");
        self.stop(id, StopRequest::Terminate(reason)).await
    }

    /// Resolves once the workflow reaches a terminal state.
    pub async fn wait_for_completion(
        &self,
        id: &WorkflowId,
    ) -> Result<StatusResponse, WorkflowError> {
        let watched = lock_runs(&self.runs)
            .get(id)
            .map(|handle| handle.state.clone());
        if let Some(mut state) = watched {
            // an Err only means the driver exited; the store has the last word
            let _ = state.wait_for(|s| s.is_terminal()).await;
        }

        loop {
            let record = self.store.get(id).await?;
            if record.state.is_terminal() {
                return Ok(record.into());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Picks up every `RUNNING` workflow in the store that has no live driver
    /// and continues it from its recorded history.
    ///
    /// Instances whose history cannot be replayed are skipped and logged.
    /// An activity that was in flight when the previous process stopped keeps
    /// its retry budget: attempts already scheduled in history count against
    /// the policy's limit.
    pub async fn resume_incomplete(&self) -> Result<Vec<WorkflowId>, WorkflowError> {
        let mut resumed = Vec::new();
        for id in self.store.list_running().await? {
            if lock_runs(&self.runs).contains_key(&id) {
                continue;
            }
            match self.resume(&id).await {
                Ok(()) => resumed.push(id),
                Err(e) => warn!(workflow_id = %id, "Cannot resume workflow: {}", e),
            }
        }
        Ok(resumed)
    }

    /// Detaches every live driver without closing its workflow.
    ///
    /// The instances stay `RUNNING` in the store and can be picked up again
    /// with [`resume_incomplete`](Self::resume_incomplete).
    pub fn shutdown(&self) {
        for handle in lock_runs(&self.runs).values() {
            handle.control.token.cancel();
        }
    }

    async fn resume(&self, id: &WorkflowId) -> Result<(), WorkflowError> {
        let record = self.store.get(id).await?;
        let history = self.history(id).await?;

        if history
            .iter()
            .any(|e| e.event == EventType::WorkflowExecutionCancelRequested)
        {
            self.store.finish(id, stopped_closing(&StopRequest::Cancel)).await?;
            info!(workflow_id = %id, "Closed workflow with pending cancellation");
            return Ok(());
        }
        if history.is_empty() {
            self.store
                .append_event(
                    id,
                    EventType::WorkflowExecutionStarted,
                    json!({ "input": serde_json::to_value(&record.input)? }),
                )
                .await?;
        }

        let resolutions = resolutions_from_history(&history)?;
        let replayed = resolutions.len();
        let attempts_used = attempts_in_flight(&history);
        let (orchestrator, command) = replay(record.input, resolutions)?;
        info!(
            workflow_id = %id,
            replayed,
            attempts_used,
            phase = %orchestrator.phase(),
            "Resuming workflow"
        );

        let remaining = self.settings.execution_timeout().map(|limit| {
            let elapsed = (Utc::now() - record.started_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            limit.saturating_sub(elapsed)
        });
        self.spawn(id.clone(), orchestrator, command, attempts_used, remaining);
        Ok(())
    }

    async fn ensure_running(&self, id: &WorkflowId) -> Result<(), WorkflowError> {
        let record = self.store.get(id).await?;
        if record.state.is_terminal() {
            return Err(WorkflowError::AlreadyTerminal {
                id: id.clone(),
                state: record.state,
            });
        }
        Ok(())
    }

    async fn stop(
        &self,
        id: &WorkflowId,
        request: StopRequest,
    ) -> Result<StatusResponse, WorkflowError> {
        let control = lock_runs(&self.runs)
            .get(id)
            .map(|handle| Arc::clone(&handle.control));
        match control {
            Some(control) => {
                control.request(request);
                self.wait_for_completion(id).await
            }
            None => match self.store.finish(id, stopped_closing(&request)).await {
                Ok(record) => {
                    info!(workflow_id = %id, state = %record.state, "Workflow closed");
                    Ok(record.into())
                }
                Err(StoreError::AlreadyTerminal { .. }) => self.status(id).await,
                Err(e) => Err(e.into()),
            },
        }
    }

    fn spawn(
        &self,
        id: WorkflowId,
        orchestrator: OrderOrchestrator,
        command: Command,
        attempts_used: u32,
        limit: Option<Duration>,
    ) {
        let control = Arc::new(RunControl::default());
        let (state_tx, state_rx) = watch::channel(WorkflowState::Running);
        lock_runs(&self.runs).insert(
            id.clone(),
            RunHandle {
                control: Arc::clone(&control),
                state: state_rx,
            },
        );

        let run = Run {
            executor: RetryExecutor::new(HistoryRecorder::new(id.clone(), Arc::clone(&self.store))),
            id,
            store: Arc::clone(&self.store),
            activities: Arc::clone(&self.activities),
            control,
            runs: Arc::clone(&self.runs),
        };
        tokio::spawn(run.drive(orchestrator, command, attempts_used, limit, state_tx));
    }
}

fn stopped_closing(request: &StopRequest) -> Closing {
    match request {
        StopRequest::Cancel => Closing {
            state: WorkflowState::Canceled,
            result: None,
            failure: None,
            data: json!({}),
        },
        StopRequest::Terminate(reason) => Closing {
            state: WorkflowState::Terminated,
            result: None,
            failure: None,
            data: json!({ "reason": reason }),
        },
    }
}

enum Finish {
    Complete(OrderResult),
    Fail(FailureReason),
}

enum Halt {
    Stopped,
    TimedOut(Duration),
    Error(WorkflowError),
}

impl From<WorkflowError> for Halt {
    fn from(err: WorkflowError) -> Self {
        Halt::Error(err)
    }
}

/// One driver task.
struct Run {
    id: WorkflowId,
    store: Arc<dyn WorkflowStore>,
    activities: Arc<Activities>,
    executor: RetryExecutor,
    control: Arc<RunControl>,
    runs: Runs,
}

impl Run {
    async fn drive(
        self,
        mut orchestrator: OrderOrchestrator,
        command: Command,
        attempts_used: u32,
        limit: Option<Duration>,
        state: watch::Sender<WorkflowState>,
    ) {
        let run = self.advance(&mut orchestrator, command, attempts_used);
        let outcome = match limit {
            Some(limit) => timeout(limit, run)
                .await
                .unwrap_or(Err(Halt::TimedOut(limit))),
            None => run.await,
        };

        let closing = match outcome {
            Ok(Finish::Complete(result)) => Closing {
                state: project_state(orchestrator.phase(), Some(&result)),
                data: json!({ "result": result }),
                result: Some(result),
                failure: None,
            },
            Ok(Finish::Fail(reason)) => Closing {
                state: WorkflowState::Failed,
                data: json!({ "failure": reason }),
                result: None,
                failure: Some(reason),
            },
            Err(Halt::Stopped) => match self.control.requested() {
                Some(request) => stopped_closing(&request),
                None => {
                    info!(workflow_id = %self.id, phase = %orchestrator.phase(), "Workflow run detached");
                    self.release();
                    return;
                }
            },
            Err(Halt::TimedOut(limit)) => {
                warn!(workflow_id = %self.id, phase = %orchestrator.phase(), "Workflow execution timed out");
                Closing {
                    state: WorkflowState::TimedOut,
                    result: None,
                    failure: None,
                    data: json!({ "timeoutSecs": limit.as_secs() }),
                }
            }
            Err(Halt::Error(e)) => {
                warn!(workflow_id = %self.id, "Workflow run aborted, instance left running: {}", e);
                self.release();
                return;
            }
        };

        match self.store.finish(&self.id, closing).await {
            Ok(record) => {
                info!(workflow_id = %self.id, state = %record.state, "Workflow closed");
                state.send_replace(record.state);
            }
            Err(StoreError::AlreadyTerminal { state: closed, .. }) => {
                debug!(workflow_id = %self.id, state = %closed, "Workflow was closed elsewhere");
                state.send_replace(closed);
            }
            Err(e) => warn!(workflow_id = %self.id, "Failed to close workflow: {}", e),
        }
        self.release();
    }

    /// `attempts_used` applies to the first command only; it is non-zero
    /// when a recovered activity already spent part of its retry budget.
    async fn advance(
        &self,
        orchestrator: &mut OrderOrchestrator,
        mut command: Command,
        mut attempts_used: u32,
    ) -> Result<Finish, Halt> {
        loop {
            if self.control.token.is_cancelled() {
                return Err(Halt::Stopped);
            }

            let used = std::mem::take(&mut attempts_used);
            let resolution = match command {
                Command::CheckInventory(request) => Resolution::Inventory(
                    self.execute(&self.activities.inventory, &request, used).await?,
                ),
                Command::ProcessPayment(request) => Resolution::Payment(
                    self.execute(&self.activities.payment, &request, used).await?,
                ),
                Command::CalculateShipping(request) => Resolution::Shipping(
                    self.execute(&self.activities.shipping, &request, used).await?,
                ),
                Command::Complete(result) => return Ok(Finish::Complete(result)),
                Command::Fail(reason) => return Ok(Finish::Fail(reason)),
            };

            command = orchestrator.resolve(resolution)?;
            if orchestrator.phase() != Phase::Done {
                if let Some(result) = orchestrator.result() {
                    self.store
                        .save_progress(&self.id, result)
                        .await
                        .map_err(|e| Halt::Error(e.into()))?;
                }
            }
        }
    }

    /// Runs one activity through the retry executor unless the run is
    /// stopped first.
    async fn execute<A: Activity>(
        &self,
        activity: &A,
        input: &A::Input,
        attempts_used: u32,
    ) -> Result<Result<A::Output, FailureReason>, Halt> {
        tokio::select! {
            biased;
            _ = self.control.token.cancelled() => Err(Halt::Stopped),
            outcome = self.executor.resume(activity, input, attempts_used) => match outcome {
                Ok(outcome) => Ok(outcome.map_err(|failure| failure.reason())),
                Err(e) => Err(Halt::Error(e.into())),
            },
        }
    }

    fn release(&self) {
        lock_runs(&self.runs).remove(&self.id);
    }
}
