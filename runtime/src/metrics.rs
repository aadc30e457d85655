//! Prometheus metrics for observability and monitoring.
//!
//! This module records metrics for every coordination component:
//! - Event store commits, loads, snapshots and publishing
//! - Command dispatch
//! - Saga event handling
//! - Projection restores and live events
//!
//! Without an installed recorder the `metrics` macros are no-ops, so nothing
//! here is required at runtime. Install [`MetricsExporter`] to collect them.
//!
//! # Example
//!
//! ```rust,no_run
//! use eventide_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//!
//! // ... run the application ...
//!
//! if let Some(text) = exporter.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder with an in-process renderer.
///
/// The host application decides how to expose [`render`](Self::render)'s
/// output (HTTP endpoint, log line, push gateway).
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Create an exporter that is not installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions and install the global recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the bucket configuration is rejected
    /// and [`MetricsError::Install`] if another recorder cannot be replaced.
    ///
    /// # Note
    ///
    /// A recorder that is already installed (e.g. by an earlier test) is not
    /// an error; the exporter then has no handle and renders nothing.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!(
                        "Metrics recorder already initialized, skipping re-initialization"
                    );
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this exporter did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Event Store Metrics
    describe_counter!(
        "event_store_events_committed_total",
        "Total number of events committed to event storage"
    );
    describe_counter!(
        "event_store_events_loaded_total",
        "Total number of events loaded from event storage"
    );
    describe_counter!(
        "event_store_snapshots_saved_total",
        "Total number of aggregate snapshots saved"
    );
    describe_counter!(
        "event_store_sagas_started_total",
        "Total number of saga ids assigned to starter events"
    );
    describe_counter!(
        "event_store_publish_errors_total",
        "Total number of failed event publications"
    );
    describe_histogram!(
        "event_store_commit_duration_seconds",
        "Time taken to validate and persist a batch"
    );
    describe_histogram!(
        "event_store_load_duration_seconds",
        "Time taken to load events"
    );

    // Command Metrics
    describe_counter!(
        "commands_processed_total",
        "Total number of commands handled successfully"
    );
    describe_counter!(
        "commands_failed_total",
        "Total number of commands whose handling failed"
    );
    describe_histogram!(
        "command_duration_seconds",
        "Time taken to handle a command"
    );

    // Saga Metrics
    describe_counter!(
        "saga_events_handled_total",
        "Total number of events applied to sagas"
    );
    describe_counter!(
        "saga_commands_sent_total",
        "Total number of commands sent by sagas"
    );
    describe_counter!(
        "saga_command_errors_total",
        "Total number of saga commands that failed to send"
    );

    // Projection Metrics
    describe_counter!(
        "projection_events_projected_total",
        "Total number of live events applied to projections"
    );
    describe_counter!(
        "projection_restores_total",
        "Total number of completed projection restores"
    );
    describe_counter!(
        "projection_restore_failures_total",
        "Total number of failed projection restores"
    );
    describe_histogram!(
        "projection_restore_duration_seconds",
        "Time taken to replay history into a projection"
    );
}

/// Event store metrics recorder.
pub struct EventStoreMetrics;

impl EventStoreMetrics {
    /// Record a persisted batch.
    pub fn record_commit(count: usize, duration: Duration) {
        counter!("event_store_events_committed_total").increment(count as u64);
        histogram!("event_store_commit_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record an event load operation.
    pub fn record_load(count: usize, duration: Duration) {
        counter!("event_store_events_loaded_total").increment(count as u64);
        histogram!("event_store_load_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a snapshot save operation.
    pub fn record_snapshot() {
        counter!("event_store_snapshots_saved_total").increment(1);
    }

    /// Record a saga id assignment.
    pub fn record_saga_start() {
        counter!("event_store_sagas_started_total").increment(1);
    }

    /// Record a publish failure.
    pub fn record_publish_error() {
        counter!("event_store_publish_errors_total").increment(1);
    }
}

/// Command metrics recorder.
pub struct CommandMetrics;

impl CommandMetrics {
    /// Record a handled command.
    pub fn record_processed(command_type: &str, duration: Duration) {
        counter!("commands_processed_total", "type" => command_type.to_string()).increment(1);
        histogram!("command_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed command.
    pub fn record_failure(command_type: &str) {
        counter!("commands_failed_total", "type" => command_type.to_string()).increment(1);
    }
}

/// Saga metrics recorder.
pub struct SagaMetrics;

impl SagaMetrics {
    /// Record an applied event.
    pub fn record_event() {
        counter!("saga_events_handled_total").increment(1);
    }

    /// Record a sent command.
    pub fn record_command() {
        counter!("saga_commands_sent_total").increment(1);
    }

    /// Record a command send failure.
    pub fn record_command_error() {
        counter!("saga_command_errors_total").increment(1);
    }
}

/// Projection metrics recorder.
pub struct ProjectionMetrics;

impl ProjectionMetrics {
    /// Record a live projected event.
    pub fn record_projected(projection: &str) {
        counter!("projection_events_projected_total", "projection" => projection.to_string())
            .increment(1);
    }

    /// Record a completed restore.
    pub fn record_restore(projection: &str, duration: Duration) {
        counter!("projection_restores_total", "projection" => projection.to_string()).increment(1);
        histogram!("projection_restore_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed restore.
    pub fn record_restore_failure(projection: &str) {
        counter!("projection_restore_failures_total", "projection" => projection.to_string())
            .increment(1);
    }
}
