//! Error types for the stream processor
//!
//! Per-record failures are logged and dropped inside the engine; only the
//! errors below cross module boundaries. Construction-time failures
//! (unknown aggregate function, invalid window, unreachable bus) surface as
//! [`ProcessorError`] and abort pipeline start-up.

use metricflow_types::ModelError;
use thiserror::Error;

/// Main processor error type
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// Window-related errors
    #[error("window error: {0}")]
    Window(#[from] WindowError),

    /// Aggregation-related errors
    #[error("aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    /// Sink delivery errors
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// Search-index bulk errors
    #[error("bulk error: {0}")]
    Bulk(#[from] BulkError),

    /// Invalid process definition
    #[error("definition error: {0}")]
    Model(#[from] ModelError),

    /// Configuration errors
    #[error("configuration error: {source}")]
    Configuration {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Kafka-related errors
    #[error("kafka error: {source}")]
    Kafka {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Generic error for unexpected conditions
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// Window assignment errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WindowError {
    /// Window size is invalid
    #[error("invalid window size: {size}ms, must be greater than 0")]
    InvalidWindowSize { size: u64 },

    /// Advance is invalid for hopping windows
    #[error("invalid advance: {advance}ms, must be greater than 0 and less than or equal to window size {window}ms")]
    InvalidAdvance { advance: u64, window: u64 },

    /// Gap size is invalid for session windows
    #[error("invalid gap size: {gap}ms, must be greater than 0")]
    InvalidGapSize { gap: u64 },

    /// Event timestamp cannot be represented
    #[error("invalid event timestamp: {timestamp}, reason: {reason}")]
    InvalidTimestamp { timestamp: i64, reason: String },
}

/// Aggregate function errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    /// No function registered under this name
    #[error("unknown aggregate function: {name}")]
    UnknownFunction { name: String },

    /// Merge between accumulators of different functions
    #[error("cannot merge {right} accumulator into {left}")]
    IncompatibleMerge { left: String, right: String },

    /// Invalid metric value (NaN, Inf, etc.)
    #[error("invalid metric value: {value}, reason: {reason}")]
    InvalidValue { value: f64, reason: String },

    /// Insufficient data for aggregation
    #[error("insufficient data for {aggregation_type}: need at least {required} samples, got {actual}")]
    InsufficientData {
        aggregation_type: String,
        required: u64,
        actual: u64,
    },
}

/// Sink delivery errors
#[derive(Error, Debug)]
pub enum SinkError {
    /// The transport rejected or failed the delivery
    #[error("{sink} delivery failed: {reason}")]
    Delivery { sink: &'static str, reason: String },

    /// The result could not be rendered for the sink
    #[error("render failed: {0}")]
    Render(String),

    /// The sink is not configured in this process
    #[error("{0} transport is not configured")]
    NotConfigured(&'static str),

    /// The delivery queue of the sink is full; the result is dropped
    #[error("{0} delivery queue is full")]
    QueueFull(&'static str),

    /// The sink no longer accepts results
    #[error("{0} sink is closed")]
    Closed(&'static str),
}

impl SinkError {
    pub fn delivery(sink: &'static str, reason: impl ToString) -> Self {
        SinkError::Delivery {
            sink,
            reason: reason.to_string(),
        }
    }
}

/// Search-index store errors
#[derive(Error, Debug)]
pub enum BulkError {
    /// The request never produced a response
    #[error("bulk request failed: {0}")]
    Request(String),

    /// The store answered with a non-success status for the whole request
    #[error("bulk request rejected with status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be decoded
    #[error("bulk response decode failed: {0}")]
    Decode(String),

    /// Client construction failed
    #[error("index store client error: {0}")]
    Client(String),

    /// The document timestamp is not RFC 3339
    #[error("invalid document timestamp {value:?}: {reason}")]
    Timestamp { value: String, reason: String },

    /// The document could not be serialized
    #[error("document serialization failed: {0}")]
    Document(String),

    /// The writer no longer accepts documents
    #[error("bulk writer is shut down")]
    Closed,
}

impl BulkError {
    /// Whether resubmitting the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            BulkError::Request(_) => true,
            BulkError::Status { status, .. } => *status == 429 || *status >= 500,
            BulkError::Decode(_)
            | BulkError::Client(_)
            | BulkError::Timestamp { .. }
            | BulkError::Document(_)
            | BulkError::Closed => false,
        }
    }
}

/// Result type alias for processor operations
pub type Result<T> = std::result::Result<T, ProcessorError>;

/// Result type alias for window operations
pub type WindowResult<T> = std::result::Result<T, WindowError>;

/// Result type alias for aggregation operations
pub type AggregationResult<T> = std::result::Result<T, AggregationError>;

/// Result type alias for sink operations
pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// Result type alias for bulk operations
pub type BulkResult<T> = std::result::Result<T, BulkError>;

impl From<serde_json::Error> for ProcessorError {
    fn from(err: serde_json::Error) -> Self {
        ProcessorError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for ProcessorError {
    fn from(err: anyhow::Error) -> Self {
        ProcessorError::Unexpected(err.to_string())
    }
}

impl From<metricflow_config::ConfigError> for ProcessorError {
    fn from(err: metricflow_config::ConfigError) -> Self {
        ProcessorError::Configuration {
            source: Box::new(err),
        }
    }
}

impl From<rdkafka::error::KafkaError> for ProcessorError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        ProcessorError::Kafka {
            source: Box::new(err),
        }
    }
}
