//! Kafka source consumer
//!
//! [`KafkaSource`] subscribes a `StreamConsumer` to one or more topics and
//! forwards every message, undecoded, into a bounded channel until the
//! cancellation token fires. Decoding is left to the pipeline so that each
//! pipeline can count its own bad payloads.

use crate::error::{ProcessorError, Result};
use chrono::Utc;
use metricflow_config::KafkaConfig;
use metricflow_types::Record;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::BorrowedMessage;
use rdkafka::{ClientContext, Message, TopicPartitionList};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a consumer error before polling again
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// A message as read from the bus
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    /// Broker timestamp, or ingestion time when the broker has none
    pub timestamp_ms: Option<i64>,
}

impl SourceMessage {
    pub fn new(topic: impl Into<String>, partition: i32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset: 0,
            key: None,
            payload: payload.into(),
            timestamp_ms: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    /// Parse the payload as a JSON document
    pub fn decode_record(&self) -> serde_json::Result<Record> {
        let value = serde_json::from_slice(&self.payload)?;
        let mut record = Record::new(value);
        record.key = self.key.clone();
        record.timestamp_ms = self.timestamp_ms;
        Ok(record)
    }

    /// Parse the payload into a typed value
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }

    fn from_borrowed(message: &BorrowedMessage<'_>) -> Self {
        let timestamp_ms = message
            .timestamp()
            .to_millis()
            .or_else(|| Some(Utc::now().timestamp_millis()));
        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            timestamp_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KafkaSourceConfig {
    pub brokers: String,
    pub group_id: String,
    pub topics: Vec<String>,
    pub auto_offset_reset: String,
    pub session_timeout_ms: u64,
}

impl KafkaSourceConfig {
    pub fn new(kafka: &KafkaConfig, group_id: impl Into<String>, topics: Vec<String>) -> Self {
        Self {
            brokers: kafka.brokers.clone(),
            group_id: group_id.into(),
            topics,
            auto_offset_reset: kafka.auto_offset_reset.clone(),
            session_timeout_ms: kafka.session_timeout_ms,
        }
    }
}

/// Logs partition movements
struct SourceConsumerContext;

impl ClientContext for SourceConsumerContext {}

impl ConsumerContext for SourceConsumerContext {
    fn post_rebalance(&self, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                let partitions: Vec<(String, i32)> = tpl
                    .elements()
                    .iter()
                    .map(|e| (e.topic().to_string(), e.partition()))
                    .collect();
                info!(?partitions, "partitions assigned");
            }
            Rebalance::Revoke(_) => info!("partitions revoked"),
            Rebalance::Error(err) => error!(error = %err, "rebalance error"),
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        if let Err(err) = result {
            warn!(error = %err, "offset commit failed");
        }
    }
}

pub struct KafkaSource {
    consumer: StreamConsumer<SourceConsumerContext>,
    config: KafkaSourceConfig,
}

impl KafkaSource {
    pub fn new(config: KafkaSourceConfig) -> Result<Self> {
        let consumer: StreamConsumer<SourceConsumerContext> = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("enable.auto.commit", "true")
            .set("enable.partition.eof", "false")
            .create_with_context(SourceConsumerContext)
            .map_err(|e| ProcessorError::Configuration {
                source: Box::new(e),
            })?;
        Ok(Self { consumer, config })
    }

    pub fn topics(&self) -> &[String] {
        &self.config.topics
    }

    pub fn subscribe(&self) -> Result<()> {
        let topics: Vec<&str> = self.config.topics.iter().map(String::as_str).collect();
        self.consumer
            .subscribe(&topics)
            .map_err(|e| ProcessorError::Configuration {
                source: Box::new(e),
            })?;
        info!(group_id = %self.config.group_id, ?topics, "subscribed");
        Ok(())
    }

    /// Forward messages to `tx` until `shutdown` fires or the receiver is gone
    pub async fn run(&self, tx: mpsc::Sender<SourceMessage>, shutdown: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(group_id = %self.config.group_id, "source shutting down");
                    break;
                }
                received = self.consumer.recv() => match received.map(|m| SourceMessage::from_borrowed(&m)) {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            warn!("pipeline channel closed, stopping consumer");
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "error consuming message");
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for KafkaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaSource").field("config", &self.config).finish()
    }
}
