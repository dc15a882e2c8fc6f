//! Kafka integration
//!
//! [`KafkaSource`] feeds raw messages into the pipelines through bounded
//! channels; [`KafkaBusPublisher`] writes results back to the bus for the
//! `bus` sink.
//!
//! # Example
//!
//! ```rust,no_run
//! use metricflow_config::KafkaConfig;
//! use processor::kafka::{KafkaSource, KafkaSourceConfig};
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let kafka = KafkaConfig::default();
//! let source = KafkaSource::new(KafkaSourceConfig::new(&kafka, "metricflow", vec!["metrics".into()]))?;
//! source.subscribe()?;
//!
//! let (tx, mut rx) = mpsc::channel(1024);
//! let shutdown = CancellationToken::new();
//! tokio::spawn(async move { source.run(tx, shutdown).await });
//!
//! while let Some(message) = rx.recv().await {
//!     println!("{}:{} {:?}", message.topic, message.partition, message.decode_record());
//! }
//! # Ok(())
//! # }
//! ```

mod publisher;
mod source;

pub use publisher::{is_retryable, BusPublisher, KafkaBusPublisher};
pub use source::{KafkaSource, KafkaSourceConfig, SourceMessage};
