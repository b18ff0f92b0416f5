//! Periodic state snapshots.
//!
//! Writes the queue, job and API key stores to disk whenever any of them
//! changed since the last write. Persistence failures are logged and never
//! stop the service.

use std::sync::Arc;
use std::time::Duration;

use docrelay_store::snapshot::Persister;
use tokio_util::sync::CancellationToken;

use crate::state::Registries;

/// Run the snapshot loop until `cancel` is triggered, then write once more.
pub async fn run(
    persister: Arc<Persister>,
    registries: Registries,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        path = %persister.path().display(),
        interval_secs = interval.as_secs(),
        "State persistence started",
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("State persistence stopping");
                break;
            }
            _ = ticker.tick() => {
                match persister.save_if_changed(registries.stores()).await {
                    Ok(true) => tracing::debug!("State snapshot saved"),
                    Ok(false) => {}
                    Err(e) => tracing::error!(error = %e, "State snapshot failed"),
                }
            }
        }
    }

    if let Err(e) = persister.save_if_changed(registries.stores()).await {
        tracing::error!(error = %e, "Final state snapshot failed");
    }
}
