//! Publishing results back to the bus

use crate::error::{ProcessorError, Result};
use async_trait::async_trait;
use metricflow_config::KafkaConfig;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Keyed publish to a topic
#[async_trait]
pub trait BusPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> anyhow::Result<()>;
}

pub struct KafkaBusPublisher {
    producer: FutureProducer,
    send_timeout: Duration,
    max_retries: u32,
    base_backoff: Duration,
}

impl KafkaBusPublisher {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| ProcessorError::Configuration {
                source: Box::new(e),
            })?;

        Ok(Self {
            producer,
            send_timeout: Duration::from_millis(config.message_timeout_ms),
            max_retries: config.send_retries,
            base_backoff: Duration::from_millis(100),
        })
    }

    fn backoff(&self, retry: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.pow(retry.min(10)))
            .min(Duration::from_secs(60))
    }

    /// Wait for in-flight messages
    pub fn flush(&self, timeout: Duration) {
        if let Err(e) = self.producer.flush(Timeout::After(timeout)) {
            warn!(error = %e, "producer flush incomplete");
        }
    }
}

/// Transient producer failures worth another attempt
pub fn is_retryable(error: &KafkaError) -> bool {
    matches!(
        error,
        KafkaError::MessageProduction(
            RDKafkaErrorCode::QueueFull
                | RDKafkaErrorCode::NetworkException
                | RDKafkaErrorCode::RequestTimedOut
                | RDKafkaErrorCode::NotLeaderForPartition
        )
    )
}

#[async_trait]
impl BusPublisher for KafkaBusPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> anyhow::Result<()> {
        let mut retries = 0;
        loop {
            let record = FutureRecord::to(topic).key(key).payload(payload);
            match self.producer.send(record, Timeout::After(self.send_timeout)).await {
                Ok((partition, offset)) => {
                    debug!(topic, key, partition, offset, "published");
                    return Ok(());
                }
                Err((err, _)) if retries < self.max_retries && is_retryable(&err) => {
                    retries += 1;
                    let backoff = self.backoff(retries);
                    warn!(
                        topic,
                        error = %err,
                        "send failed (attempt {}/{}), retrying in {:?}",
                        retries,
                        self.max_retries + 1,
                        backoff
                    );
                    sleep(backoff).await;
                }
                Err((err, _)) => {
                    error!(topic, retries, error = %err, "failed to publish");
                    return Err(err.into());
                }
            }
        }
    }
}

impl std::fmt::Debug for KafkaBusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaBusPublisher")
            .field("send_timeout", &self.send_timeout)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}
