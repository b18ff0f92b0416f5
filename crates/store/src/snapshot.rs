//! JSON snapshot persistence for the in-memory stores.
//!
//! The whole state is written to one file through a temp file and a rename,
//! so a crash mid-write leaves the previous snapshot intact. Saves are
//! skipped when no store's revision counter moved since the last save.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use docrelay_core::types::Timestamp;

use crate::api_keys::ApiKeyStore;
use crate::error::StoreError;
use crate::models::api_key::ApiKeyRecord;
use crate::models::job::Job;
use crate::queue::{DocumentQueue, QueueSnapshot};
use crate::tracker::JobTracker;

/// Format version written into every snapshot.
pub const SNAPSHOT_VERSION: u32 = 1;

/// File name inside the data directory.
pub const SNAPSHOT_FILE: &str = "state.json";

/// Versioned envelope around the persisted state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub saved_at: Timestamp,
    pub queue: QueueSnapshot,
    pub jobs: Vec<Job>,
    pub api_keys: Vec<ApiKeyRecord>,
}

/// Borrowed handles to every store that takes part in a snapshot.
#[derive(Clone, Copy)]
pub struct Stores<'a> {
    pub queue: &'a DocumentQueue,
    pub tracker: &'a JobTracker,
    pub api_keys: &'a ApiKeyStore,
}

impl Stores<'_> {
    fn revisions(&self) -> (u64, u64, u64) {
        (
            self.queue.revision(),
            self.tracker.revision(),
            self.api_keys.revision(),
        )
    }
}

pub struct Persister {
    path: PathBuf,
    /// Revisions captured by the last successful save.
    last_saved: Mutex<Option<(u64, u64, u64)>>,
}

impl Persister {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(SNAPSHOT_FILE),
            last_saved: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot file. `Ok(None)` when no file exists yet.
    pub async fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::Invalid(format!(
                "Unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }

    /// Load the snapshot into the stores.
    ///
    /// A missing file is not an error. Returns whether anything was restored.
    pub async fn restore(&self, stores: Stores<'_>) -> Result<bool, StoreError> {
        let Some(snapshot) = self.load().await? else {
            return Ok(false);
        };
        tracing::info!(
            path = %self.path.display(),
            saved_at = %snapshot.saved_at,
            jobs = snapshot.jobs.len(),
            queue_items = snapshot.queue.items.len(),
            api_keys = snapshot.api_keys.len(),
            "Restoring state snapshot",
        );
        stores.queue.restore(snapshot.queue).await;
        stores.tracker.restore(snapshot.jobs).await;
        stores.api_keys.restore(snapshot.api_keys).await;
        *self.last_saved.lock().await = Some(stores.revisions());
        Ok(true)
    }

    async fn capture(stores: Stores<'_>) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            queue: stores.queue.snapshot().await,
            jobs: stores.tracker.snapshot().await,
            api_keys: stores.api_keys.snapshot().await,
        }
    }

    /// Write a snapshot unconditionally.
    pub async fn save(&self, stores: Stores<'_>) -> Result<(), StoreError> {
        let mut last_saved = self.last_saved.lock().await;
        let revisions = stores.revisions();
        let snapshot = Self::capture(stores).await;
        self.write_atomic(&snapshot).await?;
        *last_saved = Some(revisions);
        Ok(())
    }

    /// Write a snapshot only when some store changed since the last save.
    /// Returns whether a file was written.
    pub async fn save_if_changed(&self, stores: Stores<'_>) -> Result<bool, StoreError> {
        let mut last_saved = self.last_saved.lock().await;
        let revisions = stores.revisions();
        if *last_saved == Some(revisions) {
            return Ok(false);
        }
        let snapshot = Self::capture(stores).await;
        self.write_atomic(&snapshot).await?;
        *last_saved = Some(revisions);
        Ok(true)
    }

    async fn write_atomic(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::debug!(path = %self.path.display(), bytes = bytes.len(), "State snapshot written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use docrelay_core::scheduling::{JobStatus, Priority, TriggerType};
    use docrelay_core::workflow::WorkflowType;

    use crate::models::job::NewJob;
    use crate::models::queue_item::{HistoryKind, NewQueueItem};

    struct Fixture {
        queue: DocumentQueue,
        tracker: JobTracker,
        api_keys: ApiKeyStore,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                queue: DocumentQueue::new(),
                tracker: JobTracker::new(),
                api_keys: ApiKeyStore::new(),
            }
        }

        fn stores(&self) -> Stores<'_> {
            Stores {
                queue: &self.queue,
                tracker: &self.tracker,
                api_keys: &self.api_keys,
            }
        }
    }

    #[tokio::test]
    async fn round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let persister = Persister::new(dir.path());
        let source = Fixture::new();

        source
            .queue
            .enqueue(NewQueueItem {
                deal_name: "Acme".into(),
                document_path: "a.pdf".into(),
                priority: Priority::High,
                metadata: None,
            })
            .await
            .unwrap();
        source
            .queue
            .record_history("Acme", "a.pdf", HistoryKind::Correction, serde_json::json!({"field": "noi"}))
            .await;
        let job = source
            .tracker
            .create_job(NewJob {
                deal_name: "Acme".into(),
                file_paths: vec!["a.pdf".into()],
                trigger_type: TriggerType::Api,
                workflow_type: WorkflowType::DocumentAnalysis,
                priority: Priority::High,
                max_retries: 3,
                metadata: None,
            })
            .await
            .unwrap();
        source.tracker.mark_queued(job.id, Some(1)).await.unwrap();

        persister.save(source.stores()).await.unwrap();

        let target = Fixture::new();
        let restored = Persister::new(dir.path()).restore(target.stores()).await.unwrap();
        assert!(restored);
        assert_eq!(target.queue.snapshot().await, source.queue.snapshot().await);
        let loaded = target.tracker.get_job(job.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::Queued);
        assert_eq!(target.tracker.interrupted_jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn missing_file_restores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = Fixture::new();
        let restored = Persister::new(dir.path()).restore(fixture.stores()).await.unwrap();
        assert!(!restored);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(SNAPSHOT_FILE), b"{not json").await.unwrap();
        let fixture = Fixture::new();
        let err = Persister::new(dir.path()).restore(fixture.stores()).await.unwrap_err();
        assert_matches!(err, StoreError::Serialization(_));
    }

    #[tokio::test]
    async fn unchanged_state_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let persister = Persister::new(dir.path());
        let fixture = Fixture::new();

        assert!(persister.save_if_changed(fixture.stores()).await.unwrap());
        assert!(!persister.save_if_changed(fixture.stores()).await.unwrap());

        fixture.tracker.cleanup_old_jobs(1).await;
        assert!(!persister.save_if_changed(fixture.stores()).await.unwrap());

        fixture
            .queue
            .record_history("Acme", "a.pdf", HistoryKind::Error, serde_json::json!({}))
            .await;
        assert!(persister.save_if_changed(fixture.stores()).await.unwrap());
        assert!(persister.path().exists());
    }
}
