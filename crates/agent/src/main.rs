//! NetPulse - network quality monitor daemon
//!
//! Runs one monitoring session on a fixed cadence and exposes its snapshot,
//! session control, health and metrics over HTTP.

use anyhow::{Context, Result};
use netpulse::{api, config::DaemonConfig};
use pulse_lib::{
    health::{components, HealthRegistry},
    observability::{PulseMetrics, StructuredLogger},
    session::SessionControllerBuilder,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = DaemonConfig::load()?;
    info!(
        node_name = %config.node_name,
        probe_mode = ?config.probe_mode,
        poll_interval_ms = config.poll_interval_ms,
        "Daemon configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::PROBE).await;
    health_registry.register(components::SESSION).await;
    health_registry.register(components::API).await;

    let metrics = PulseMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);
    logger.log_startup(DAEMON_VERSION);

    let source = config
        .stats_source()
        .await
        .context("Failed to set up statistics source")?;
    let (controller, handle) = SessionControllerBuilder::new()
        .source(source)
        .config(config.session_config())
        .metrics(metrics)
        .logger(logger.clone())
        .health(health_registry.clone())
        .build()?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let controller_task = tokio::spawn(controller.run(shutdown_rx));

    if config.autostart {
        handle.start().await?;
    }
    health_registry.set_ready(true).await;

    let app_state = Arc::new(api::AppState::new(handle, health_registry.clone()));
    let mut api_shutdown = shutdown_tx.subscribe();
    let mut api_task = tokio::spawn(api::serve(config.api_port, app_state, async move {
        let _ = api_shutdown.recv().await;
    }));

    let api_result = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
            None
        }
        result = &mut api_task => {
            health_registry
                .set_unhealthy(components::API, "API server exited")
                .await;
            logger.log_shutdown("API server exited");
            Some(result)
        }
    };

    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());

    if let Err(e) = controller_task.await {
        error!(error = %e, "Session controller task failed");
    }
    let api_result = match api_result {
        Some(result) => result,
        None => api_task.await,
    };
    match api_result {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
