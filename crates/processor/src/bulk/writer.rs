//! Buffered bulk index writer

use super::buffer::{BulkItem, EsBuffer};
use super::retry::{RetryPolicy, RetryWriter, WriteReport};
use super::store::IndexStore;
use crate::error::{BulkError, BulkResult};
use crate::metrics::ProcessorMetrics;
use chrono::{DateTime, Utc};
use metricflow_config::SearchIndexConfig;
use metricflow_types::RetentionLevel;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A document addressed to a logical index
#[derive(Debug, Clone)]
pub struct IndexRequest<T> {
    /// RFC 3339 document time; selects the retention bucket
    pub timestamp: String,
    /// Logical index, before project and retention are applied
    pub index: String,
    pub retention: RetentionLevel,
    pub project: String,
    pub document: T,
}

#[derive(Debug, Clone)]
pub struct BulkWriterConfig {
    pub max_items: usize,
    pub flush_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for BulkWriterConfig {
    fn default() -> Self {
        Self {
            max_items: 500,
            flush_interval: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&SearchIndexConfig> for BulkWriterConfig {
    fn from(config: &SearchIndexConfig) -> Self {
        Self {
            max_items: config.max_items,
            flush_interval: config.flush_interval(),
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

struct Shared {
    buffer: EsBuffer,
    retry: RetryWriter,
    // one flush in flight at a time
    flush_lock: tokio::sync::Mutex<()>,
}

impl Shared {
    async fn flush(&self) -> WriteReport {
        let _guard = self.flush_lock.lock().await;
        let items = self.buffer.take();
        if items.is_empty() {
            return WriteReport::default();
        }
        let count = items.len();
        let report = self.retry.write(items).await;
        debug!(
            items = count,
            indexed = report.indexed,
            dropped = report.dropped,
            "bulk flush done"
        );
        report
    }
}

/// Accepts documents, buffers them and writes them in bulk.
///
/// A background flush lane writes the buffer every `flush_interval` and as
/// soon as it holds `max_items` documents.
pub struct BulkIndexWriter {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    lane: Mutex<Option<JoinHandle<()>>>,
}

impl BulkIndexWriter {
    /// Build the writer and spawn its flush lane; requires a tokio runtime
    pub fn new(store: Arc<dyn IndexStore>, config: BulkWriterConfig, metrics: ProcessorMetrics) -> Self {
        let shared = Arc::new(Shared {
            buffer: EsBuffer::new(config.max_items, config.flush_interval),
            retry: RetryWriter::new(store, config.retry, metrics),
            flush_lock: tokio::sync::Mutex::new(()),
        });
        let shutdown = CancellationToken::new();
        let lane = tokio::spawn(flush_lane(shared.clone(), shutdown.clone()));

        Self {
            shared,
            shutdown,
            lane: Mutex::new(Some(lane)),
        }
    }

    /// Validate, address and enqueue one document.
    ///
    /// Rejected documents are logged here; the error tells the caller why.
    pub fn process<T: Serialize>(&self, request: IndexRequest<T>) -> BulkResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(BulkError::Closed);
        }

        let at = DateTime::parse_from_rfc3339(&request.timestamp)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| {
                warn!(timestamp = %request.timestamp, index = %request.index, error = %e, "Couldn't parse date");
                BulkError::Timestamp {
                    value: request.timestamp.clone(),
                    reason: e.to_string(),
                }
            })?;

        let source = serde_json::to_string(&request.document).map_err(|e| {
            warn!(index = %request.index, error = %e, "Couldn't serialize document");
            BulkError::Document(e.to_string())
        })?;

        let index = request
            .retention
            .index_name(&request.project, &request.index, at);
        self.shared.buffer.push(BulkItem::new(index, source));
        Ok(())
    }

    /// Write whatever is buffered now
    pub async fn flush(&self) -> WriteReport {
        self.shared.flush().await
    }

    /// Documents waiting for the next flush
    pub fn pending(&self) -> usize {
        self.shared.buffer.len()
    }

    /// Stop the flush lane and write the remaining documents
    pub async fn shutdown(&self) -> WriteReport {
        self.shutdown.cancel();
        let lane = self.lane.lock().take();
        if let Some(lane) = lane {
            if let Err(e) = lane.await {
                warn!(error = %e, "bulk flush lane ended abnormally");
            }
        }
        let report = self.shared.flush().await;
        info!(indexed = report.indexed, dropped = report.dropped, "bulk writer stopped");
        report
    }
}

impl Drop for BulkIndexWriter {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for BulkIndexWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkIndexWriter")
            .field("pending", &self.pending())
            .field("retry", &self.shared.retry)
            .finish()
    }
}

async fn flush_lane(shared: Arc<Shared>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(shared.buffer.flush_interval().max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if !shared.buffer.is_empty() {
                    shared.flush().await;
                }
            }
            _ = shared.buffer.full() => {
                shared.flush().await;
            }
        }
    }
}
