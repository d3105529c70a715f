//! Event-driven metrics collection.
//!
//! The dispatcher thread never touches OpenTelemetry directly. It sends small
//! [`MetricsEvent`] values over an unbounded channel, and a task on the tokio
//! runtime folds them into instruments that are exported over OTLP.

use anyhow::Result;
use crossbeam_channel::{self, Receiver, Sender};
use once_cell::sync::OnceCell;
use opentelemetry::{
    metrics::{Counter, Meter, MeterProvider, ObservableGauge},
    KeyValue,
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    runtime, Resource,
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::config::TelemetryConfig;

/// Global metrics event sender
static METRICS_SENDER: OnceCell<Sender<MetricsEvent>> = OnceCell::new();

/// Metrics events for fire-and-forget recording.
///
/// Organized by layer:
/// - Socket: PacketReceived, PacketSent, NetworkReceiveError, NetworkSendError, WriteBlocked
/// - Dispatcher: PacketDropped, Session*, TimeWaitPacket, PublicResetSent, VersionNegotiationSent
/// - Worker: WorkerStarted, WorkerStopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricsEvent {
    // ========== Socket ==========
    /// Datagram read from the socket
    PacketReceived { bytes: usize },

    /// Datagram handed to the kernel
    PacketSent { bytes: usize },

    /// recv failed with something other than "would block"
    NetworkReceiveError,

    /// send failed with something other than "would block"
    NetworkSendError,

    /// A write hit a full socket buffer
    WriteBlocked,

    // ========== Dispatcher ==========
    /// Datagram dropped without reaching a session
    PacketDropped { reason: &'static str },

    /// New session inserted into the session table
    SessionCreated,

    /// Session left the session table
    SessionClosed,

    /// Closed sessions dropped by a deletion pass
    SessionsDeleted { count: usize },

    /// Datagram for a connection id in time-wait
    TimeWaitPacket,

    /// Public reset written for a time-wait connection
    PublicResetSent,

    /// Version negotiation reply written
    VersionNegotiationSent,

    // ========== Worker ==========
    WorkerStarted,

    WorkerStopped,
}

/// Handle to the metrics task for graceful shutdown
pub struct MetricsHandle {
    task_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl MetricsHandle {
    /// Create a disabled handle (when metrics are disabled)
    pub fn disabled() -> Self {
        Self {
            task_handle: None,
            shutdown_tx: None,
        }
    }

    /// Shutdown the metrics task gracefully with timeout
    pub async fn shutdown(self) {
        if let Some(tx) = self.shutdown_tx {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Err(e)) => tracing::error!(error = ?e, "Metrics task panicked during shutdown"),
                Ok(Ok(())) => {}
                Err(_) => tracing::error!("Metrics task shutdown timed out after 5 seconds"),
            }
        }
    }
}

/// Metrics collector that aggregates events into OpenTelemetry instruments
struct MetricsCollector {
    // Socket
    packets_received: Counter<u64>,
    packets_sent: Counter<u64>,
    bytes_received: Counter<u64>,
    bytes_sent: Counter<u64>,
    network_errors: Counter<u64>,
    write_blocked: Counter<u64>,

    // Dispatcher
    packets_dropped: Counter<u64>,
    sessions_created: Counter<u64>,
    sessions_active: Arc<AtomicU64>,
    _sessions_active_gauge: ObservableGauge<u64>,
    sessions_pending_deletion: Arc<AtomicU64>,
    _sessions_pending_deletion_gauge: ObservableGauge<u64>,
    time_wait_packets: Counter<u64>,
    public_resets_sent: Counter<u64>,
    version_negotiations_sent: Counter<u64>,

    // Worker
    active_workers: Arc<AtomicU64>,
    _active_workers_gauge: ObservableGauge<u64>,
}

fn observed_gauge(
    meter: &Meter,
    name: &'static str,
    description: &'static str,
) -> (Arc<AtomicU64>, ObservableGauge<u64>) {
    let value = Arc::new(AtomicU64::new(0));
    let observed = Arc::clone(&value);
    let gauge = meter
        .u64_observable_gauge(name)
        .with_description(description)
        .with_callback(move |observer| {
            observer.observe(observed.load(Ordering::Relaxed), &[]);
        })
        .build();
    (value, gauge)
}

fn decrement(value: &AtomicU64, by: u64) {
    let _ = value.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_sub(by))
    });
}

impl MetricsCollector {
    fn new(meter: &Meter) -> Self {
        let (sessions_active, _sessions_active_gauge) = observed_gauge(
            meter,
            "dispatcher.sessions.active",
            "Sessions currently in the session table",
        );
        let (sessions_pending_deletion, _sessions_pending_deletion_gauge) = observed_gauge(
            meter,
            "dispatcher.sessions.pending_deletion",
            "Closed sessions waiting for the deletion alarm",
        );
        let (active_workers, _active_workers_gauge) = observed_gauge(
            meter,
            "workers.active",
            "Number of running dispatcher workers",
        );

        Self {
            packets_received: meter
                .u64_counter("network.packets.received")
                .with_description("Total number of UDP packets received")
                .build(),
            packets_sent: meter
                .u64_counter("network.packets.sent")
                .with_description("Total number of UDP packets sent")
                .build(),
            bytes_received: meter
                .u64_counter("network.bytes.received")
                .with_description("Total bytes received from network")
                .build(),
            bytes_sent: meter
                .u64_counter("network.bytes.sent")
                .with_description("Total bytes sent to network")
                .build(),
            network_errors: meter
                .u64_counter("network.errors")
                .with_description("Total network errors")
                .build(),
            write_blocked: meter
                .u64_counter("network.write_blocked")
                .with_description("Writes that found the socket buffer full")
                .build(),
            packets_dropped: meter
                .u64_counter("dispatcher.packets.dropped")
                .with_description("Datagrams dropped before reaching a session")
                .build(),
            sessions_created: meter
                .u64_counter("dispatcher.sessions.created")
                .with_description("Total sessions created")
                .build(),
            sessions_active,
            _sessions_active_gauge,
            sessions_pending_deletion,
            _sessions_pending_deletion_gauge,
            time_wait_packets: meter
                .u64_counter("dispatcher.time_wait.packets")
                .with_description("Datagrams received for connections in time-wait")
                .build(),
            public_resets_sent: meter
                .u64_counter("dispatcher.public_resets.sent")
                .with_description("Public resets sent from time-wait")
                .build(),
            version_negotiations_sent: meter
                .u64_counter("dispatcher.version_negotiations.sent")
                .with_description("Version negotiation packets sent")
                .build(),
            active_workers,
            _active_workers_gauge,
        }
    }

    /// Process a metrics event and update corresponding instruments
    fn process_event(&self, event: MetricsEvent) {
        match event {
            MetricsEvent::PacketReceived { bytes } => {
                self.packets_received.add(1, &[]);
                self.bytes_received.add(bytes as u64, &[]);
            }
            MetricsEvent::PacketSent { bytes } => {
                self.packets_sent.add(1, &[]);
                self.bytes_sent.add(bytes as u64, &[]);
            }
            MetricsEvent::NetworkReceiveError => {
                self.network_errors
                    .add(1, &[KeyValue::new("type", "receive")]);
            }
            MetricsEvent::NetworkSendError => {
                self.network_errors.add(1, &[KeyValue::new("type", "send")]);
            }
            MetricsEvent::WriteBlocked => {
                self.write_blocked.add(1, &[]);
            }
            MetricsEvent::PacketDropped { reason } => {
                self.packets_dropped
                    .add(1, &[KeyValue::new("reason", reason)]);
            }
            MetricsEvent::SessionCreated => {
                self.sessions_created.add(1, &[]);
                self.sessions_active.fetch_add(1, Ordering::Relaxed);
            }
            MetricsEvent::SessionClosed => {
                decrement(&self.sessions_active, 1);
                self.sessions_pending_deletion
                    .fetch_add(1, Ordering::Relaxed);
            }
            MetricsEvent::SessionsDeleted { count } => {
                decrement(&self.sessions_pending_deletion, count as u64);
            }
            MetricsEvent::TimeWaitPacket => {
                self.time_wait_packets.add(1, &[]);
            }
            MetricsEvent::PublicResetSent => {
                self.public_resets_sent.add(1, &[]);
            }
            MetricsEvent::VersionNegotiationSent => {
                self.version_negotiations_sent.add(1, &[]);
            }
            MetricsEvent::WorkerStarted => {
                self.active_workers.fetch_add(1, Ordering::Relaxed);
            }
            MetricsEvent::WorkerStopped => {
                decrement(&self.active_workers, 1);
            }
        }
    }
}

/// Record a metrics event (fire-and-forget).
///
/// Never blocks. Before [`start_metrics_task`] runs, or when metrics are
/// disabled, events are discarded.
#[inline]
pub fn record_metric(event: MetricsEvent) {
    if let Some(sender) = METRICS_SENDER.get() {
        let _ = sender.send(event);
    }
}

/// Start the metrics collection task on `runtime_handle`.
pub async fn start_metrics_task(
    config: &TelemetryConfig,
    runtime_handle: &tokio::runtime::Handle,
) -> Result<MetricsHandle> {
    let (tx, rx) = crossbeam_channel::unbounded::<MetricsEvent>();

    METRICS_SENDER
        .set(tx)
        .map_err(|_| anyhow::anyhow!("Metrics sender already initialized"))?;

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()?;

    let reader = PeriodicReader::builder(exporter, runtime::Tokio)
        .with_interval(Duration::from_secs(config.export_interval_secs))
        .with_timeout(Duration::from_secs(5))
        .build();

    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            config.service_name.clone(),
        )]))
        .build();

    let meter = provider.meter("quicd");
    let collector = MetricsCollector::new(&meter);

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();

    let task_handle = runtime_handle.spawn(async move {
        tracing::info!("Metrics collection task started");

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    tracing::info!("Metrics task shutting down");
                    break;
                }
                _ = drain_batch(&rx, &collector) => {}
            }
        }

        while let Ok(event) = rx.try_recv() {
            collector.process_event(event);
        }

        if let Err(e) = provider.shutdown() {
            tracing::error!(error = ?e, "Failed to shutdown metrics provider");
        }

        tracing::info!("Metrics task stopped");
    });

    Ok(MetricsHandle {
        task_handle: Some(task_handle),
        shutdown_tx: Some(shutdown_tx),
    })
}

/// Fold up to 1000 queued events, yielding every 100, or sleep briefly if
/// the channel is empty.
async fn drain_batch(rx: &Receiver<MetricsEvent>, collector: &MetricsCollector) {
    let mut processed = 0;
    while processed < 1000 {
        match rx.try_recv() {
            Ok(event) => {
                collector.process_event(event);
                processed += 1;
                if processed % 100 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            Err(_) => break,
        }
    }

    if processed == 0 {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
