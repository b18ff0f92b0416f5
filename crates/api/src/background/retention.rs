//! Periodic cleanup of finished queue items and jobs.
//!
//! Runs on a fixed interval using `tokio::time::interval`. Only terminal
//! records older than their retention window are removed.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::state::Registries;

/// Run the retention sweep until `cancel` is triggered.
pub async fn run(
    registries: Registries,
    queue_retention_hours: i64,
    job_retention_hours: i64,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        queue_retention_hours,
        job_retention_hours,
        interval_secs = interval.as_secs(),
        "Retention job started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Retention job stopping");
                break;
            }
            _ = ticker.tick() => {
                let items = registries
                    .queue
                    .cleanup(chrono::Duration::hours(queue_retention_hours))
                    .await;
                let jobs = registries.tracker.cleanup_old_jobs(job_retention_hours).await;
                if items + jobs > 0 {
                    tracing::info!(items, jobs, "Retention: purged finished records");
                } else {
                    tracing::debug!("Retention: nothing to purge");
                }
            }
        }
    }
}
