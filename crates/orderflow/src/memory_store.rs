//! In-process [`WorkflowStore`] implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orderflow_core::{
    Closing, EventType, HistoryEvent, HistoryPage, OrderResult, StoreError, WorkflowId,
    WorkflowRecord, WorkflowState, WorkflowStore,
};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug)]
struct Entry {
    record: WorkflowRecord,
    history: Vec<HistoryEvent>,
}

impl Entry {
    fn ensure_running(&self) -> Result<(), StoreError> {
        if self.record.state.is_terminal() {
            return Err(StoreError::AlreadyTerminal {
                id: self.record.id.clone(),
                state: self.record.state,
            });
        }
        Ok(())
    }

    fn push(&mut self, event: EventType, data: serde_json::Value) -> HistoryEvent {
        let now = Utc::now();
        let time = match self.history.last() {
            Some(last) if last.time > now => last.time,
            _ => now,
        };
        let event = HistoryEvent {
            event_id: self.history.len() as u64 + 1,
            time,
            event,
            data,
        };
        self.history.push(event.clone());
        event
    }
}

/// Keeps records and history in memory behind a `tokio` read-write lock.
///
/// Readers never wait on a running activity: the lock is only held for the
/// duration of a single store call.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<WorkflowId, Entry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn create(&self, record: WorkflowRecord) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        entries.insert(
            record.id.clone(),
            Entry {
                record,
                history: Vec::new(),
            },
        );
        Ok(())
    }

    async fn get(&self, id: &WorkflowId) -> Result<WorkflowRecord, StoreError> {
        let entries = self.entries.read().await;
        entries
            .get(id)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| StoreError::WorkflowNotFound(id.clone()))
    }

    async fn save_progress(
        &self,
        id: &WorkflowId,
        result: &OrderResult,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| StoreError::WorkflowNotFound(id.clone()))?;
        entry.ensure_running()?;
        entry.record.result = Some(result.clone());
        Ok(())
    }

    async fn finish(
        &self,
        id: &WorkflowId,
        closing: Closing,
    ) -> Result<WorkflowRecord, StoreError> {
        let Some(event) = EventType::closing(closing.state) else {
            return Err(StoreError::Backend(format!(
                "cannot close workflow {} as {}",
                id,
                WorkflowState::Running
            )));
        };

        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| StoreError::WorkflowNotFound(id.clone()))?;
        entry.ensure_running()?;

        let closed = entry.push(event, closing.data);
        let record = &mut entry.record;
        record.state = closing.state;
        if closing.result.is_some() {
            record.result = closing.result;
        }
        record.failure = closing.failure;
        record.closed_at = Some(closed.time);
        Ok(record.clone())
    }

    async fn append_event(
        &self,
        id: &WorkflowId,
        event: EventType,
        data: serde_json::Value,
    ) -> Result<HistoryEvent, StoreError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| StoreError::WorkflowNotFound(id.clone()))?;
        entry.ensure_running()?;
        Ok(entry.push(event, data))
    }

    async fn read_history(
        &self,
        id: &WorkflowId,
        from: Option<u64>,
        page_size: usize,
    ) -> Result<HistoryPage, StoreError> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(id)
            .ok_or_else(|| StoreError::WorkflowNotFound(id.clone()))?;

        let start = from.unwrap_or(1).max(1) as usize - 1;
        let page_size = page_size.max(1);
        let events: Vec<HistoryEvent> = entry
            .history
            .iter()
            .skip(start)
            .take(page_size)
            .cloned()
            .collect();
        let next_index = start + events.len();
        let next_page_token = if next_index < entry.history.len() {
            Some(next_index as u64 + 1)
        } else {
            None
        };
        Ok(HistoryPage {
            events,
            next_page_token,
        })
    }

    async fn list_running(&self) -> Result<Vec<WorkflowId>, StoreError> {
        let entries = self.entries.read().await;
        let mut running: Vec<(DateTime<Utc>, WorkflowId)> = entries
            .values()
            .filter(|entry| !entry.record.state.is_terminal())
            .map(|entry| (entry.record.started_at, entry.record.id.clone()))
            .collect();
        running.sort();
        Ok(running.into_iter().map(|(_, id)| id).collect())
    }
}
