//! Stream processor for metricflow
//!
//! This crate computes windowed aggregates over event streams read from
//! Kafka, optionally correlates them with a second stream, and fans every
//! result out to the sinks of its pipeline. It also hosts the error
//! ingestion pipeline and the bulk writer both of them use to reach the
//! search-index store.

pub mod aggregation;
pub mod aggregator;
pub mod bulk;
pub mod error;
pub mod error_pipeline;
pub mod join;
pub mod kafka;
pub mod metrics;
pub mod pipeline;
pub mod result;
pub mod rules;
pub mod sink;
pub mod transform;
pub mod watermark;
pub mod window;

// Re-export commonly used types
pub use aggregation::{AggregateFactory, AggregateFunction, AggregateRegistry};

pub use aggregator::{DropReason, RecordOutcome, WindowedAggregator};

pub use bulk::{BulkIndexWriter, HttpIndexStore, IndexRequest, IndexStore, RetryPolicy};

pub use error::{
    AggregationError, BulkError, ProcessorError, SinkError, WindowError,
    Result as ProcessorResult,
};

pub use error_pipeline::ErrorIndexProcessor;

pub use join::JoinStage;

pub use kafka::{BusPublisher, KafkaBusPublisher, KafkaSource, KafkaSourceConfig, SourceMessage};

pub use metrics::{MetricsServer, ProcessorMetrics};

pub use pipeline::{MetricPipeline, PipelineBuilder, PipelineExecutor, Runtime};

pub use result::{MetricResult, WindowedResult};

pub use rules::{FieldRules, MetricRules};

pub use sink::{RouteReport, SinkRouter, SinkTransports};

pub use transform::{FormatDate, Transformation};

pub use watermark::{BoundedOutOfOrdernessWatermark, Watermark, WatermarkGenerator};

pub use window::{WindowAssigner, WindowBounds};
