//! Metrics for command handling and event consumption.
//!
//! Everything is recorded through the `metrics` facade. Installing a
//! recorder is optional: without one the macros are no-ops. The binary
//! installs the Prometheus recorder and can render a text snapshot.
//!
//! ```rust,no_run
//! use roomledger_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let recorder = MetricsRecorder::install()?;
//! // ... run the system ...
//! if let Some(text) = recorder.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// The Prometheus recorder could not be installed.
    #[error("Failed to install metrics recorder: {0}")]
    Install(String),
}

/// Handle on the installed Prometheus recorder.
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Install the Prometheus recorder as the global `metrics` recorder.
    ///
    /// If another recorder is already installed (common in tests) this logs
    /// a warning and returns a recorder that renders nothing.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] for any other installation failure.
    pub fn install() -> Result<Self, MetricsError> {
        describe_metrics();

        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                tracing::info!("Prometheus metrics recorder installed");
                Ok(Self {
                    handle: Some(handle),
                })
            }
            Err(e) => {
                let message = e.to_string();
                if message.contains("already") {
                    tracing::warn!("Metrics recorder already installed, keeping the existing one");
                    Ok(Self { handle: None })
                } else {
                    Err(MetricsError::Install(message))
                }
            }
        }
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this process did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn describe_metrics() {
    describe_counter!(
        "commands_dispatched_total",
        "Commands dispatched, by kind and outcome"
    );
    describe_histogram!(
        "command_duration_seconds",
        "Time taken to handle a command, by kind"
    );
    describe_counter!(
        "events_persisted_total",
        "Events appended to the event store, by event type"
    );
    describe_counter!(
        "events_handled_total",
        "Events processed by consumers, by consumer and outcome"
    );
}

/// Command dispatch metrics.
pub struct CommandMetrics;

impl CommandMetrics {
    /// Record one dispatched command.
    pub fn record(kind: &'static str, outcome: &'static str, duration: Duration) {
        counter!("commands_dispatched_total", "kind" => kind, "outcome" => outcome).increment(1);
        histogram!("command_duration_seconds", "kind" => kind).record(duration.as_secs_f64());
    }
}

/// Event store metrics.
pub struct EventStoreMetrics;

impl EventStoreMetrics {
    /// Record one appended event.
    pub fn record_persisted(event_type: &str) {
        counter!("events_persisted_total", "event_type" => event_type.to_string()).increment(1);
    }
}

/// Event consumer metrics.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record one event handled successfully.
    pub fn record_handled(consumer: &str) {
        counter!("events_handled_total", "consumer" => consumer.to_string(), "outcome" => "ok")
            .increment(1);
    }

    /// Record one event whose handler failed.
    pub fn record_failed(consumer: &str) {
        counter!("events_handled_total", "consumer" => consumer.to_string(), "outcome" => "error")
            .increment(1);
    }
}
