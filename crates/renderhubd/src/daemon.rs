//! Daemon wiring: opens the store, builds the clients, starts both loops
//! and serves the API until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;

use renderhub_autoscale::{AutoscaleHost, ScaleUpProcessor, WakeSignal};
use renderhub_batch::BatchClientFactory;
use renderhub_core::{EnvironmentDirectory, HubConfig};
use renderhub_state::StateStore;
use renderhub_telemetry::{ActiveNodeProvider, AppInsightsClient};

pub async fn run(config: HubConfig) -> anyhow::Result<()> {
    info!("RenderHub daemon starting");

    // ── State store ──────────────────────────────────────────────
    let data_dir = &config.server.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("create data dir {}", data_dir.display()))?;
    let db_path = data_dir.join("renderhub.redb");
    let store = StateStore::open(&db_path)?.with_add_attempts(config.scale_up.add_retries);
    info!(path = ?db_path, "state store opened");

    for env in &config.environments {
        store.put_environment(env)?;
        info!(environment = %env.name, "environment seeded from config");
    }

    // ── External clients ─────────────────────────────────────────
    let telemetry = AppInsightsClient::new(
        config.telemetry.endpoint.as_str(),
        Duration::from_secs(config.telemetry.timeout_secs),
    )?;
    let active_nodes = ActiveNodeProvider::new(Arc::new(telemetry))
        .with_lookback_minutes(config.telemetry.lookback_minutes);

    let pools = Arc::new(
        BatchClientFactory::from_env(
            config.batch.api_version.as_str(),
            &config.batch.access_token_env,
            Duration::from_secs(config.batch.timeout_secs),
        )
        .context("batch API credentials")?,
    );

    let directory: Arc<dyn EnvironmentDirectory> = Arc::new(store.clone());
    let wake = WakeSignal::new();

    // ── Background loops ─────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let autoscaler = AutoscaleHost::new(directory.clone(), pools.clone(), active_nodes)
        .with_interval(config.autoscale.interval())
        .with_max_removals(config.autoscale.max_removals_per_cycle);
    let autoscale_shutdown = shutdown_rx.clone();
    let autoscale_handle = tokio::spawn(async move {
        autoscaler.run(autoscale_shutdown).await;
    });

    let processor = ScaleUpProcessor::new(store.clone(), directory, pools, wake.clone())
        .with_poll_delay(config.scale_up.poll_delay());
    let processor_shutdown = shutdown_rx.clone();
    let processor_handle = tokio::spawn(async move {
        processor.run(processor_shutdown).await;
    });

    // ── API server ───────────────────────────────────────────────
    let router = renderhub_api::build_router(store, wake);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Let in-flight cycles finish.
    let _ = autoscale_handle.await;
    let _ = processor_handle.await;

    info!("RenderHub daemon stopped");
    Ok(())
}
