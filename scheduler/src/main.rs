// Scan scheduler binary entry point

use anyhow::Context;
use common::bootstrap;
use common::config::Settings;
use common::telemetry;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;

    info!("Queue adder scan scheduler starting");

    settings.validate().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;

    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    info!(
        poll_interval_seconds = settings.scheduler.poll_interval_seconds,
        staleness_threshold_hours = settings.scheduler.staleness_threshold_hours,
        queue_backend = ?settings.queue.backend,
        "Checking for endpoints that need scanning every {} seconds, queueing endpoints not scanned in the last {} hours",
        settings.scheduler.poll_interval_seconds,
        settings.scheduler.staleness_threshold_hours
    );

    let store = bootstrap::init_endpoint_store(&settings)?;
    let transport = bootstrap::init_queue_transport(&settings)?;
    let scheduler = bootstrap::build_scheduler(&settings, store, transport);

    let shutdown = scheduler.shutdown_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Initiating graceful shutdown");
        shutdown.shutdown();
    });

    let result = scheduler.start().await;
    telemetry::shutdown_tracer();

    match result {
        Ok(cycles) => {
            info!(cycles, "Scan scheduler exited");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Cannot start service without database connection. Exiting.");
            Err(e.into())
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}
