//! Prometheus metrics for the processor
//!
//! Counters are defined in [`ProcessorMetrics`] and exposed in the text
//! format by [`MetricsServer`] at `/metrics`, next to `/health` and `/ready`.

mod labels;
mod prometheus;
mod registry;
mod server;

pub use labels::{LabelNames, OutcomeLabels, PipelineLabels, ReasonLabels, SinkLabels};
pub use prometheus::{MetricsSnapshot, ProcessorMetrics};
pub use registry::{MetricsRegistry, METRICS_REGISTRY};
pub use server::{HealthStatus, MetricsServer, MetricsServerConfig, ReadinessStatus};

use thiserror::Error;

/// Errors that can occur in the metrics subsystem
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Failed to start metrics server: {0}")]
    ServerStartError(String),

    #[error("Failed to bind to address {address}: {source}")]
    BindError {
        address: String,
        source: std::io::Error,
    },

    #[error("Metric encoding error: {0}")]
    EncodingError(String),
}

pub type Result<T> = std::result::Result<T, MetricsError>;
