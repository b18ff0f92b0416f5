//! Background feeder that turns queued documents into dispatched jobs.
//!
//! Polls every `poll_interval` and, while the dispatcher has free slots,
//! takes the head pending queue item, creates a job for it and hands the
//! job to the [`Dispatcher`]. Slot accounting means the queue, not the
//! dispatcher backlog, absorbs bursts.
//!
//! Stopping the feeder loop does not withdraw what it already handed over;
//! those requests run until the dispatcher itself stops.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use docrelay_store::models::job::NewJob;
use docrelay_store::models::queue_item::{QueueItem, WorkflowSignal};

use super::dispatcher::{build_payload, DispatchError, Dispatcher};
use crate::state::Registries;

pub struct QueueFeeder {
    registries: Registries,
    dispatcher: Arc<Dispatcher>,
    /// Parent of every request the feeder hands over.
    requests: CancellationToken,
}

impl QueueFeeder {
    pub fn new(registries: Registries, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            registries,
            dispatcher,
            requests: CancellationToken::new(),
        }
    }

    /// Run the feeder loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let poll_interval = self.dispatcher.get_config().await.poll_interval();
        let mut ticker = tokio::time::interval(poll_interval);
        tracing::info!(
            poll_interval_ms = poll_interval.as_millis() as u64,
            "Queue feeder started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Queue feeder shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.try_feed().await {
                        Ok(0) => {}
                        Ok(fed) => tracing::debug!(fed, "Queue items handed to dispatcher"),
                        Err(DispatchError::NotRunning) => {}
                        Err(e) => tracing::error!(error = %e, "Feed cycle failed"),
                    }
                }
            }
        }
    }

    /// One feed cycle. Returns how many queue items were dispatched.
    pub async fn try_feed(&self) -> Result<usize, DispatchError> {
        if !self.dispatcher.is_running() {
            return Ok(0);
        }
        let mut fed = 0;
        while self.dispatcher.available_slots().await > 0 {
            let Some(item) = self.registries.queue.dequeue().await else {
                break;
            };
            self.feed_item(item).await?;
            fed += 1;
        }
        Ok(fed)
    }

    async fn feed_item(&self, item: QueueItem) -> Result<(), DispatchError> {
        let queue = &self.registries.queue;
        let config = self.dispatcher.get_config().await;

        let mut metadata = match item.metadata.clone() {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        metadata.insert("queueId".into(), serde_json::json!(item.id));

        let input = NewJob {
            deal_name: item.deal_name.clone(),
            file_paths: vec![item.document_path.clone()],
            trigger_type: Default::default(),
            workflow_type: Default::default(),
            priority: item.priority,
            max_retries: config.max_retries,
            metadata: Some(serde_json::Value::Object(metadata)),
        };
        let job = match self.registries.tracker.create_job(input).await {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(queue_id = %item.id, error = %e, "Could not create job for queue item");
                queue.release(item.id).await?;
                return Err(e.into());
            }
        };
        queue.attach_job(item.id, job.id).await?;

        match self
            .dispatcher
            .send_document_analysis_request(build_payload(&job, config.job_timeout_secs), &self.requests)
            .await
        {
            Ok(request) => {
                tracing::info!(
                    queue_id = %item.id,
                    job_id = %job.id,
                    request_id = %request.id,
                    document = %item.document_path,
                    "Queue item dispatched",
                );
                Ok(())
            }
            Err(DispatchError::NotRunning) => {
                // Stopped mid-cycle; the next start resubmits queued jobs.
                tracing::info!(queue_id = %item.id, job_id = %job.id, "Dispatcher stopped, job left queued");
                self.registries.tracker.mark_queued(job.id, None).await?;
                Err(DispatchError::NotRunning)
            }
            Err(e) => {
                tracing::error!(queue_id = %item.id, job_id = %job.id, error = %e, "Queue item not accepted");
                if let Err(fail) = self.registries.tracker.fail_job(job.id, &e.to_string()).await {
                    tracing::debug!(job_id = %job.id, error = %fail, "Job not failed");
                }
                queue.synchronize_state(job.id, WorkflowSignal::Failed).await;
                Err(e)
            }
        }
    }
}
