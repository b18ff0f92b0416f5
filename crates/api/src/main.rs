use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docrelay_api::background;
use docrelay_api::config::ServerConfig;
use docrelay_api::engine::feeder::QueueFeeder;
use docrelay_api::router::build_app_router;
use docrelay_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docrelay_api=debug,tower_http=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid configuration")?;
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- App state ---
    let state = AppState::from_config(config.clone()).context("Failed to build webhook client")?;

    match state.persister.restore(state.registries.stores()).await {
        Ok(true) => tracing::info!(path = %state.persister.path().display(), "State restored"),
        Ok(false) => tracing::info!("No saved state, starting empty"),
        Err(e) => tracing::warn!(error = %e, "Saved state unreadable, starting empty"),
    }

    if let Some(raw_key) = &config.admin_api_key {
        state
            .auth
            .import_bootstrap_key(raw_key, config.admin_signing_secret.clone())
            .await
            .context("Failed to import ADMIN_API_KEY")?;
    }

    // --- Dispatcher ---
    // Requests outlive the background loops; `dispatcher.stop()` ends them.
    let requests = CancellationToken::new();
    state.dispatcher.start().await?;
    match state.dispatcher.resubmit_interrupted(&requests).await {
        Ok(0) => {}
        Ok(count) => tracing::info!(count, "Interrupted jobs resubmitted"),
        Err(e) => tracing::warn!(error = %e, "Failed to resubmit interrupted jobs"),
    }

    // --- Background tasks ---
    let cancel = CancellationToken::new();
    let feeder_cancel = CancellationToken::new();
    let feeder = QueueFeeder::new(state.registries.clone(), Arc::clone(&state.dispatcher));
    let feeder_token = feeder_cancel.clone();
    let feeder_handle = tokio::spawn(async move {
        feeder.run(feeder_token).await;
    });

    let persistence_handle = tokio::spawn(background::persistence::run(
        Arc::clone(&state.persister),
        state.registries.clone(),
        config.snapshot_interval(),
        cancel.clone(),
    ));

    let retention_handle = tokio::spawn(background::retention::run(
        state.registries.clone(),
        config.queue_retention_hours,
        config.job_retention_hours,
        config.cleanup_interval(),
        cancel.clone(),
    ));

    tracing::info!("Background services started (feeder, persistence, retention)");

    // --- Router ---
    let app = build_app_router(state.clone(), &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().context("Invalid HOST address")?,
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Feeder first so nothing new is handed over while the pool drains.
    feeder_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), feeder_handle).await;

    // In-flight sends finish; unsent jobs stay queued for the next start.
    // Stopping the dispatcher writes a snapshot.
    if let Err(e) = state.dispatcher.stop().await {
        tracing::warn!(error = %e, "Dispatcher stop failed, saving state directly");
        state
            .persister
            .save(state.registries.stores())
            .await
            .context("Final state save failed")?;
    }

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), retention_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), persistence_handle).await;
    tracing::info!("Background services stopped");

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
