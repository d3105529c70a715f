use anyhow::Context;
use quicd_dispatcher::{apps, config, runtime, telemetry, worker};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

fn main() -> anyhow::Result<()> {
    let config = config::load_config()?;

    let bind_addr = config
        .global
        .network
        .bind_addr()
        .map_err(anyhow::Error::msg)
        .with_context(|| "invalid bind address")?;

    // Create tokio runtime for non-critical async tasks (telemetry, signals)
    let tokio_runtime = runtime::create_runtime(&config.global.runtime)
        .with_context(|| "failed to create tokio runtime")?;
    let runtime_handle = tokio_runtime.handle().clone();

    let metrics_handle = tokio_runtime.block_on(async {
        telemetry::init_telemetry(&config.global.telemetry, &config.global.logging, &runtime_handle)
            .await
            .with_context(|| "failed to initialize telemetry")
    })?;

    info!("Configuration loaded successfully");

    let app_registry = apps::build_registry(&config)
        .with_context(|| "failed to build application registry")?;

    info!(
        "Application registry initialized with {} version(s): {}",
        app_registry.len(),
        app_registry
            .versions()
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    // The dispatcher gets its own native thread, NOT the tokio runtime
    let worker_handle = worker::spawn(
        bind_addr,
        config.global.network.reuse_addr,
        config.global.netio.clone(),
        config.global.dispatcher.clone(),
        app_registry,
    )
    .with_context(|| "failed to spawn dispatcher worker")?;

    info!(addr = %worker_handle.local_addr(), "Dispatcher listening");

    let shutdown_notify = Arc::new(Notify::new());
    let shutdown_notify_clone = Arc::clone(&shutdown_notify);

    tokio_runtime.spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("Failed to install Ctrl+C handler: {}", e);
            return;
        }
        info!("Shutdown signal received");
        shutdown_notify_clone.notify_one();
    });

    tokio_runtime.block_on(async {
        shutdown_notify.notified().await;
    });

    info!("Initiating graceful shutdown");

    // Blocks until the worker has closed its sessions and exited
    worker_handle.shutdown();

    tokio_runtime.block_on(async {
        metrics_handle.shutdown().await;
    });

    info!("Shutting down tokio runtime");
    tokio_runtime.shutdown_timeout(std::time::Duration::from_secs(5));

    info!("Shutdown complete");
    Ok(())
}
