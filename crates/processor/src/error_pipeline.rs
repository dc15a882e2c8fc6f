//! Error-record ingestion
//!
//! Upstream pipelines publish their processing failures as [`ErrorData`] on
//! the errors topic. [`ErrorIndexProcessor`] persists them into the
//! `errors` logical index with weekly retention. Error indices are not split
//! by project; the originating project stays a field of the document.

use crate::bulk::{BulkIndexWriter, IndexRequest};
use crate::error::{BulkError, BulkResult};
use crate::kafka::SourceMessage;
use crate::metrics::ProcessorMetrics;
use crate::sink::NO_PROJECT;
use metricflow_types::{ErrorData, RetentionLevel};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Logical index error records are written to
pub const ERROR_INDEX: &str = "errors";

/// Retention of the error indices
pub const ERROR_RETENTION: RetentionLevel = RetentionLevel::Week;

pub struct ErrorIndexProcessor {
    writer: Arc<BulkIndexWriter>,
    metrics: ProcessorMetrics,
}

impl ErrorIndexProcessor {
    pub fn new(writer: Arc<BulkIndexWriter>, metrics: ProcessorMetrics) -> Self {
        Self { writer, metrics }
    }

    /// Decode a raw bus message and index it
    pub fn process_message(&self, message: &SourceMessage) -> BulkResult<()> {
        let data: ErrorData = match message.decode() {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "dropping undecodable error record"
                );
                self.metrics.record_error_dropped("invalid_json");
                return Err(BulkError::Document(e.to_string()));
            }
        };
        self.process(message.key.as_deref(), data)
    }

    /// Index one error record.
    ///
    /// The record is dropped when its timestamp is not RFC 3339; the bulk
    /// writer logs the rejection.
    pub fn process(&self, key: Option<&str>, data: ErrorData) -> BulkResult<()> {
        let request = IndexRequest {
            timestamp: data.timestamp.clone(),
            index: ERROR_INDEX.to_string(),
            retention: ERROR_RETENTION,
            project: NO_PROJECT.to_string(),
            document: data,
        };

        match self.writer.process(request) {
            Ok(()) => {
                debug!(key, "error record queued");
                Ok(())
            }
            Err(e) => {
                let reason = match &e {
                    BulkError::Timestamp { .. } => "invalid_timestamp",
                    BulkError::Document(_) => "invalid_document",
                    _ => "writer_closed",
                };
                self.metrics.record_error_dropped(reason);
                Err(e)
            }
        }
    }

    /// Consume messages until the channel closes or `shutdown` fires.
    ///
    /// On shutdown the messages already queued are still handed to the
    /// writer so its final flush includes them.
    pub async fn run(&self, mut rx: mpsc::Receiver<SourceMessage>, shutdown: CancellationToken) {
        info!(index = ERROR_INDEX, "error pipeline started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let mut drained = 0usize;
                    while let Ok(message) = rx.try_recv() {
                        let _ = self.process_message(&message);
                        drained += 1;
                    }
                    debug!(drained, "error pipeline drained on shutdown");
                    break;
                }
                message = rx.recv() => match message {
                    Some(message) => {
                        // failures are already logged and counted
                        let _ = self.process_message(&message);
                    }
                    None => break,
                },
            }
        }
        info!("error pipeline stopped");
    }
}

impl std::fmt::Debug for ErrorIndexProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorIndexProcessor")
            .field("writer", &self.writer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::{BulkItem, BulkResponse, BulkWriterConfig, IndexStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use prometheus_client::registry::Registry;
    use serde_json::{json, Value};
    use std::time::Duration;

    #[derive(Default)]
    struct MemoryStore {
        items: Mutex<Vec<BulkItem>>,
    }

    #[async_trait]
    impl IndexStore for MemoryStore {
        async fn bulk(&self, items: &[BulkItem]) -> BulkResult<BulkResponse> {
            self.items.lock().extend_from_slice(items);
            Ok(BulkResponse::success(items.len()))
        }
    }

    fn processor() -> (ErrorIndexProcessor, Arc<BulkIndexWriter>, Arc<MemoryStore>, ProcessorMetrics) {
        let store = Arc::new(MemoryStore::default());
        let metrics = ProcessorMetrics::new(&mut Registry::default());
        let config = BulkWriterConfig {
            flush_interval: Duration::from_secs(3600),
            ..BulkWriterConfig::default()
        };
        let writer = Arc::new(BulkIndexWriter::new(store.clone(), config, metrics.clone()));
        (
            ErrorIndexProcessor::new(writer.clone(), metrics.clone()),
            writer,
            store,
            metrics,
        )
    }

    #[tokio::test]
    async fn test_indexes_into_shared_weekly_index() {
        let (processor, writer, store, _) = processor();
        for project in ["toto", "titi"] {
            let data = ErrorData::new("2024-03-05T10:00:00Z")
                .with_project(project)
                .with_field("message", json!("boom"));
            processor.process(Some("k"), data).unwrap();
        }
        writer.flush().await;

        let items = store.items.lock();
        assert_eq!(items.len(), 2);
        assert!(items
            .iter()
            .all(|i| i.index == "no-project-errors-week-2024-w10"));
        let source: Value = serde_json::from_str(&items[0].source).unwrap();
        assert_eq!(source["project"], "toto");
        assert_eq!(source["message"], "boom");
        assert_eq!(source["timestamp"], "2024-03-05T10:00:00Z");
    }

    #[tokio::test]
    async fn test_missing_project_uses_placeholder() {
        let (processor, writer, store, _) = processor();
        processor
            .process(None, ErrorData::new("2024-03-05T10:00:00Z"))
            .unwrap();
        writer.flush().await;
        assert_eq!(store.items.lock()[0].index, "no-project-errors-week-2024-w10");
    }

    #[tokio::test]
    async fn test_invalid_timestamp_is_dropped() {
        let (processor, writer, store, metrics) = processor();
        let err = processor
            .process(None, ErrorData::new("yesterday at noon"))
            .unwrap_err();

        assert!(matches!(err, BulkError::Timestamp { .. }));
        assert_eq!(writer.pending(), 0);
        writer.flush().await;
        assert!(store.items.lock().is_empty());
        assert_eq!(metrics.error_dropped_count("invalid_timestamp"), 1);
    }

    #[tokio::test]
    async fn test_invalid_json_is_dropped() {
        let (processor, writer, _, metrics) = processor();
        let message = SourceMessage::new("errors", 0, b"{not json".to_vec());

        assert!(processor.process_message(&message).is_err());
        assert_eq!(writer.pending(), 0);
        assert_eq!(metrics.error_dropped_count("invalid_json"), 1);
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let (processor, writer, store, _) = processor();
        let (tx, rx) = mpsc::channel(8);
        let payload = serde_json::to_vec(&json!({
            "timestamp": "2024-03-05T10:00:00Z",
            "project": "toto",
            "error": "timeout"
        }))
        .unwrap();
        tx.send(SourceMessage::new("errors", 0, payload)).await.unwrap();
        drop(tx);

        processor.run(rx, CancellationToken::new()).await;
        writer.flush().await;
        assert_eq!(store.items.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_queued_records_survive_shutdown() {
        let (processor, writer, store, _) = processor();
        let (tx, rx) = mpsc::channel(8);
        for n in 0..3 {
            let payload = serde_json::to_vec(&json!({
                "timestamp": "2024-03-05T10:00:00Z",
                "error": format!("timeout {}", n)
            }))
            .unwrap();
            tx.send(SourceMessage::new("errors", 0, payload)).await.unwrap();
        }
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        // the sender is still open: only cancellation ends the loop
        processor.run(rx, shutdown).await;
        writer.shutdown().await;
        assert_eq!(store.items.lock().len(), 3);
        drop(tx);
    }
}
