//! # Telemetry and Observability
//!
//! Structured logging through `tracing` plus event-driven metrics exported
//! over OTLP.
//!
//! ## Architecture
//!
//! 1. **Hot path (dispatcher thread)**: fire-and-forget [`MetricsEvent`]s via
//!    [`record_metric`]; per-packet logging only at `trace`/`debug`
//! 2. **Metrics task**: a tokio task on the main runtime aggregates events
//!    into OpenTelemetry instruments and exports them periodically
//!
//! ## Usage
//!
//! ```ignore
//! use quicd_dispatcher::telemetry::{init_telemetry, record_metric, MetricsEvent};
//!
//! let metrics = init_telemetry(&config.global.telemetry, &config.global.logging, &handle).await?;
//! record_metric(MetricsEvent::PacketReceived { bytes: 1200 });
//! ```

pub mod config;
pub mod metrics;

pub use config::TelemetryConfig;
pub use metrics::{record_metric, start_metrics_task, MetricsEvent, MetricsHandle};

use crate::config::global::LoggingConfig;
use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging and, if enabled, the metrics task.
///
/// Returns the handle used to flush metrics at shutdown.
pub async fn init_telemetry(
    config: &TelemetryConfig,
    logging: &LoggingConfig,
    runtime_handle: &tokio::runtime::Handle,
) -> Result<MetricsHandle> {
    init_logging(&config.service_name, logging)?;

    let metrics_handle = if config.enable_metrics {
        tracing::info!(
            service = %config.service_name,
            endpoint = %config.otlp_endpoint,
            interval_secs = config.export_interval_secs,
            "Starting event-driven metrics system"
        );
        start_metrics_task(config, runtime_handle).await?
    } else {
        tracing::warn!("Metrics collection is disabled");
        MetricsHandle::disabled()
    };

    tracing::info!("Telemetry system initialized");
    Ok(metrics_handle)
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(service_name: &str, logging: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(logging.level.to_string())
            .with_context(|| format!("invalid log level '{}'", logging.level))?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_ansi(logging.enable_colors)
        .with_line_number(logging.include_file_line)
        .with_file(logging.include_file_line);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("global tracing subscriber already installed")?;

    tracing::info!(service = %service_name, level = %logging.level, "Logging initialized");
    Ok(())
}
