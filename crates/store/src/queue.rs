//! Priority-ordered document queue with duplicate rejection.
//!
//! Items are kept in one ordered `Vec`: a new item is inserted before the
//! first existing item with lower priority, or with equal priority and a
//! later enqueue time. Dequeue therefore only has to find the first pending
//! item. Terminal items stay in place until [`DocumentQueue::cleanup`]
//! removes them.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use docrelay_core::estimation::estimate_duration_secs;
use docrelay_core::types::{new_id, EntityId, Timestamp};

use crate::error::StoreError;
use crate::models::queue_item::{
    DocumentHistoryEntry, HistoryKind, NewQueueItem, QueueFilter, QueueItem, QueueItemStatus,
    QueueStats, WorkflowSignal,
};

/// Maximum number of document history entries kept.
pub const HISTORY_CAPACITY: usize = 1000;

/// Default page size for queue listings.
const DEFAULT_LIMIT: usize = 100;

/// Serializable copy of the queue state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub items: Vec<QueueItem>,
    pub history: Vec<DocumentHistoryEntry>,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Priority/FIFO order, terminal items included.
    items: Vec<QueueItem>,
    /// Oldest first.
    history: VecDeque<DocumentHistoryEntry>,
}

impl QueueState {
    fn has_active(&self, deal_name: &str, document_path: &str) -> bool {
        self.items.iter().any(|i| {
            i.status.is_active() && i.deal_name == deal_name && i.document_path == document_path
        })
    }

    fn insert_ordered(&mut self, item: QueueItem) {
        let index = self
            .items
            .iter()
            .position(|existing| {
                existing.priority < item.priority
                    || (existing.priority == item.priority && existing.enqueued_at > item.enqueued_at)
            })
            .unwrap_or(self.items.len());
        self.items.insert(index, item);
    }
}

pub struct DocumentQueue {
    state: RwLock<QueueState>,
    revision: AtomicU64,
}

impl Default for DocumentQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentQueue {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(QueueState::default()),
            revision: AtomicU64::new(0),
        }
    }

    /// Monotonic counter bumped on every mutation.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    fn touch(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    fn build_item(input: NewQueueItem, enqueued_at: Timestamp) -> Result<QueueItem, StoreError> {
        let deal_name = input.deal_name.trim().to_string();
        let document_path = input.document_path.trim().to_string();
        if deal_name.is_empty() {
            return Err(StoreError::Invalid("deal_name must not be empty".into()));
        }
        if document_path.is_empty() {
            return Err(StoreError::Invalid("document_path must not be empty".into()));
        }
        let document_name = Path::new(&document_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&document_path)
            .to_string();

        Ok(QueueItem {
            id: new_id(),
            job_id: None,
            estimated_duration_secs: estimate_duration_secs(&document_path),
            deal_name,
            document_path,
            document_name,
            priority: input.priority,
            enqueued_at,
            status: QueueItemStatus::Pending,
            retry_count: 0,
            actual_duration_secs: None,
            started_at: None,
            completed_at: None,
            metadata: input
                .metadata
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
        })
    }

    // -----------------------------------------------------------------------
    // Enqueue / dequeue
    // -----------------------------------------------------------------------

    /// Add one document. Fails without mutating the queue when the same
    /// (deal, path) pair is already pending or processing.
    pub async fn enqueue(&self, input: NewQueueItem) -> Result<QueueItem, StoreError> {
        let item = Self::build_item(input, Utc::now())?;

        let mut state = self.state.write().await;
        if state.has_active(&item.deal_name, &item.document_path) {
            return Err(StoreError::DuplicateSubmission {
                deal: item.deal_name,
                path: item.document_path,
            });
        }
        state.insert_ordered(item.clone());
        drop(state);
        self.touch();

        tracing::debug!(
            queue_id = %item.id,
            deal_name = %item.deal_name,
            document = %item.document_name,
            priority = item.priority.as_str(),
            "Document enqueued",
        );
        Ok(item)
    }

    /// Add several documents atomically: either all are enqueued or none.
    pub async fn enqueue_many(&self, inputs: Vec<NewQueueItem>) -> Result<Vec<QueueItem>, StoreError> {
        let now = Utc::now();
        let items = inputs
            .into_iter()
            .map(|input| Self::build_item(input, now))
            .collect::<Result<Vec<_>, _>>()?;

        let mut state = self.state.write().await;
        for (i, item) in items.iter().enumerate() {
            let repeated_in_batch = items[..i]
                .iter()
                .any(|prev| prev.deal_name == item.deal_name && prev.document_path == item.document_path);
            if repeated_in_batch || state.has_active(&item.deal_name, &item.document_path) {
                return Err(StoreError::DuplicateSubmission {
                    deal: item.deal_name.clone(),
                    path: item.document_path.clone(),
                });
            }
        }
        for item in &items {
            state.insert_ordered(item.clone());
        }
        drop(state);
        self.touch();

        tracing::debug!(count = items.len(), "Documents enqueued");
        Ok(items)
    }

    /// Take the head pending item and mark it processing.
    pub async fn dequeue(&self) -> Option<QueueItem> {
        let mut state = self.state.write().await;
        let item = state
            .items
            .iter_mut()
            .find(|i| i.status == QueueItemStatus::Pending)?;
        item.status = QueueItemStatus::Processing;
        item.started_at = Some(Utc::now());
        let item = item.clone();
        drop(state);
        self.touch();
        Some(item)
    }

    /// Put a dequeued item back at its original position.
    pub async fn release(&self, queue_id: EntityId) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let item = state
            .items
            .iter_mut()
            .find(|i| i.id == queue_id)
            .ok_or_else(|| StoreError::not_found("QueueItem", queue_id))?;
        item.status = QueueItemStatus::Pending;
        item.started_at = None;
        drop(state);
        self.touch();
        Ok(())
    }

    /// Correlate a queue item with the job created for it.
    pub async fn attach_job(&self, queue_id: EntityId, job_id: EntityId) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let item = state
            .items
            .iter_mut()
            .find(|i| i.id == queue_id)
            .ok_or_else(|| StoreError::not_found("QueueItem", queue_id))?;
        item.job_id = Some(job_id);
        drop(state);
        self.touch();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Synchronization with job outcomes
    // -----------------------------------------------------------------------

    /// Map a workflow outcome onto every item correlated with `job_id`.
    ///
    /// Returns the updated items; an empty result means the job is not
    /// queue-managed.
    pub async fn synchronize_state(&self, job_id: EntityId, signal: WorkflowSignal) -> Vec<QueueItem> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let mut updated = Vec::new();

        for item in state.items.iter_mut().filter(|i| i.job_id == Some(job_id)) {
            match signal {
                WorkflowSignal::Processing => {
                    item.status = QueueItemStatus::Processing;
                    item.started_at.get_or_insert(now);
                    item.completed_at = None;
                }
                WorkflowSignal::Completed | WorkflowSignal::Failed => {
                    item.status = if signal == WorkflowSignal::Completed {
                        QueueItemStatus::Completed
                    } else {
                        QueueItemStatus::Failed
                    };
                    item.completed_at = Some(now);
                    item.actual_duration_secs = item
                        .started_at
                        .map(|started| (now - started).num_seconds().max(0) as u64);
                }
                WorkflowSignal::Retry => {
                    item.status = QueueItemStatus::Retrying;
                    item.retry_count += 1;
                    item.completed_at = None;
                    item.actual_duration_secs = None;
                }
            }
            updated.push(item.clone());
        }
        drop(state);

        if !updated.is_empty() {
            self.touch();
        }
        updated
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    pub async fn record_history(
        &self,
        deal_name: &str,
        document_path: &str,
        kind: HistoryKind,
        results: serde_json::Value,
    ) {
        let mut state = self.state.write().await;
        state.history.push_back(DocumentHistoryEntry {
            deal_name: deal_name.to_string(),
            document_path: document_path.to_string(),
            kind,
            results,
            recorded_at: Utc::now(),
        });
        while state.history.len() > HISTORY_CAPACITY {
            state.history.pop_front();
        }
        drop(state);
        self.touch();
    }

    /// History for a deal (optionally one document), newest first.
    pub async fn history_for(&self, deal_name: &str, document_path: Option<&str>) -> Vec<DocumentHistoryEntry> {
        let state = self.state.read().await;
        state
            .history
            .iter()
            .rev()
            .filter(|h| h.deal_name == deal_name)
            .filter(|h| document_path.map_or(true, |p| h.document_path == p))
            .cloned()
            .collect()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get(&self, queue_id: EntityId) -> Option<QueueItem> {
        let state = self.state.read().await;
        state.items.iter().find(|i| i.id == queue_id).cloned()
    }

    /// Items in queue order matching every set filter.
    pub async fn query(&self, filter: &QueueFilter) -> Vec<QueueItem> {
        let state = self.state.read().await;
        state
            .items
            .iter()
            .filter(|i| filter.deal_name.as_deref().map_or(true, |d| i.deal_name == d))
            .filter(|i| filter.status.map_or(true, |s| i.status == s))
            .filter(|i| filter.priority.map_or(true, |p| i.priority == p))
            .take(filter.limit.unwrap_or(DEFAULT_LIMIT))
            .cloned()
            .collect()
    }

    /// 1-based position among pending items, `None` once the item left pending.
    pub async fn position_of(&self, queue_id: EntityId) -> Option<usize> {
        let state = self.state.read().await;
        state
            .items
            .iter()
            .filter(|i| i.status == QueueItemStatus::Pending)
            .position(|i| i.id == queue_id)
            .map(|p| p + 1)
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.read().await;
        let mut stats = QueueStats::default();
        for item in &state.items {
            match item.status {
                QueueItemStatus::Pending => {
                    stats.pending += 1;
                    stats.estimated_wait_secs += u64::from(item.estimated_duration_secs);
                }
                QueueItemStatus::Processing => stats.processing += 1,
                QueueItemStatus::Retrying => stats.retrying += 1,
                QueueItemStatus::Completed => stats.completed += 1,
                QueueItemStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Remove terminal items completed longer than `retention` ago.
    pub async fn cleanup(&self, retention: Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let mut state = self.state.write().await;
        let before = state.items.len();
        state.items.retain(|i| {
            !(i.status.is_terminal() && i.completed_at.is_some_and(|done| done < cutoff))
        });
        let removed = before - state.items.len();
        drop(state);

        if removed > 0 {
            self.touch();
            tracing::info!(removed, "Cleaned up finished queue items");
        }
        removed
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.read().await;
        QueueSnapshot {
            items: state.items.clone(),
            history: state.history.iter().cloned().collect(),
        }
    }

    /// Replace the whole state, e.g. from a snapshot loaded at startup.
    pub async fn restore(&self, snapshot: QueueSnapshot) {
        let mut state = self.state.write().await;
        state.items = snapshot.items;
        state.history = snapshot.history.into();
        while state.history.len() > HISTORY_CAPACITY {
            state.history.pop_front();
        }
        drop(state);
        self.touch();
    }
}
