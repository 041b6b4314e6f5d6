/**
 * BATTERY KERNEL - Point d'entrée du serveur télémétrie
 *
 * ROLE : bootstrap. Config, store, limiter, monitor, HTTP, arrêt propre.
 *
 * SHUTDOWN : Ctrl-C flips one watch channel. The HTTP server drains, the
 * monitor and the sweeper leave their sleep (an in-flight tick completes),
 * and main waits for both before exiting.
 */

use anyhow::Context;
use battery_kernel::config::KernelConfig;
use battery_kernel::http::{self, AppState};
use battery_kernel::ingest::IngestionGate;
use battery_kernel::limiter::SlidingWindowLimiter;
use battery_kernel::monitor::LivenessMonitor;
use battery_kernel::store::MemoryStore;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("battery_kernel=info")),
        )
        .with_target(false)
        .init();

    let cfg = KernelConfig::load().await.context("loading configuration")?;

    let store = Arc::new(match cfg.storage.journal_path() {
        Some(path) => MemoryStore::open(&path)
            .await
            .with_context(|| format!("opening journal {}", path.display()))?,
        None => {
            warn!("storage.in_memory set, data will not survive a restart");
            MemoryStore::in_memory()
        }
    });

    let limiter = Arc::new(SlidingWindowLimiter::new(
        cfg.limiter.max_requests,
        cfg.limiter.window(),
        cfg.limiter.idle_retention(),
    ));
    let gate = IngestionGate::new(limiter.clone(), store.clone());

    let settings = cfg.monitor.settings();
    let monitor = Arc::new(LivenessMonitor::new(store.clone(), store.clone(), settings));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_task = LivenessMonitor::spawn(monitor, shutdown_rx.clone());
    let sweeper_task =
        SlidingWindowLimiter::spawn_sweeper(limiter, cfg.limiter.sweep_interval(), shutdown_rx.clone());

    let app = http::build_router(AppState {
        gate,
        devices: store.clone(),
        alerts: store,
        staleness_threshold: settings.staleness_threshold,
    });

    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("binding {}", cfg.http.bind))?;
    info!(
        addr = %cfg.http.bind,
        max_requests = cfg.limiter.max_requests,
        window_secs = cfg.limiter.window_seconds,
        "listening"
    );

    let mut server_shutdown = shutdown_rx;
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = server_shutdown.changed().await;
    });

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => warn!(error = %e, "cannot listen for Ctrl-C, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    server.await.context("HTTP server failed")?;

    // Let the background loops finish their current cycle.
    monitor_task.await.context("liveness monitor task panicked")?;
    sweeper_task.await.context("limiter sweeper task panicked")?;
    info!("kernel stopped");
    Ok(())
}
