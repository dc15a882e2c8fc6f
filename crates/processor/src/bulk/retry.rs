//! Per-item failure handling for bulk writes
//!
//! Each batch goes through [`RetryWriter::write`]. Items the store accepted
//! are done; items that failed with a transient cause (429, 5xx,
//! [`REJECTED_EXECUTION`]) are resubmitted with exponential backoff until
//! the attempt budget is spent. Everything else is logged with the store's
//! own message and dropped.

use super::buffer::BulkItem;
use super::store::{BulkResponse, IndexStore, REJECTED_EXECUTION};
use crate::metrics::ProcessorMetrics;
use metricflow_config::RetryConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before resubmitting after `attempt` failed submissions (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_backoff)
    }
}

/// An item the store refused
#[derive(Debug, Clone, PartialEq)]
pub struct FailedItem {
    pub item: BulkItem,
    pub status: u16,
    pub kind: String,
    pub reason: String,
}

impl FailedItem {
    pub fn is_retryable(&self) -> bool {
        self.status == 429 || self.status >= 500 || self.kind == REJECTED_EXECUTION
    }
}

/// Pair each submitted item with its result and keep the failures.
///
/// Every failure is logged with the store's message as `item_error`.
pub fn parse_result_errors(items: &[BulkItem], response: &BulkResponse) -> Vec<FailedItem> {
    if response.items.len() != items.len() {
        warn!(
            submitted = items.len(),
            answered = response.items.len(),
            "bulk response item count mismatch"
        );
    }

    let mut failed = Vec::new();
    for (item, result) in items.iter().zip(&response.items) {
        let result = &result.index;
        if result.is_success() {
            continue;
        }
        let (kind, reason) = match &result.error {
            Some(e) => (e.kind.clone(), e.reason.clone().unwrap_or_default()),
            None => (String::from("unknown"), format!("status {}", result.status)),
        };
        info!(
            index = %item.index,
            status = result.status,
            error_type = %kind,
            item_error = %reason,
            "bulk item failed"
        );
        failed.push(FailedItem {
            item: item.clone(),
            status: result.status,
            kind,
            reason,
        });
    }
    // items the store did not answer for are treated as transient failures
    for item in items.iter().skip(response.items.len()) {
        failed.push(FailedItem {
            item: item.clone(),
            status: 503,
            kind: String::from("missing_item_result"),
            reason: String::from("no result returned for item"),
        });
    }
    failed
}

/// Totals of one [`RetryWriter::write`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub indexed: usize,
    pub failed: usize,
    pub retried: usize,
    pub dropped: usize,
}

pub struct RetryWriter {
    store: Arc<dyn IndexStore>,
    policy: RetryPolicy,
    metrics: ProcessorMetrics,
}

impl RetryWriter {
    pub fn new(store: Arc<dyn IndexStore>, policy: RetryPolicy, metrics: ProcessorMetrics) -> Self {
        Self {
            store,
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Submit a batch, resubmitting transient failures.
    ///
    /// Never returns an error: whatever cannot be written is logged, counted
    /// and dropped.
    pub async fn write(&self, items: Vec<BulkItem>) -> WriteReport {
        let mut report = WriteReport::default();
        let mut pending = items;

        while !pending.is_empty() {
            for item in pending.iter_mut() {
                item.attempts += 1;
            }
            let attempt = pending.iter().map(|i| i.attempts).max().unwrap_or(1);

            let retryable: Vec<BulkItem> = match self.store.bulk(&pending).await {
                Ok(response) => {
                    let failed = parse_result_errors(&pending, &response);
                    let indexed = pending.len() - failed.len();
                    report.indexed += indexed;
                    report.failed += failed.len();
                    self.metrics.record_bulk_indexed(indexed as u64);
                    self.metrics.record_bulk_failed(failed.len() as u64);

                    let (retry, permanent): (Vec<FailedItem>, Vec<FailedItem>) =
                        failed.into_iter().partition(FailedItem::is_retryable);
                    for failure in &permanent {
                        error!(
                            index = %failure.item.index,
                            status = failure.status,
                            error_type = %failure.kind,
                            item_error = %failure.reason,
                            "dropping document rejected by index store"
                        );
                    }
                    self.drop_items(&mut report, permanent.len());
                    retry.into_iter().map(|f| f.item).collect()
                }
                Err(e) if e.is_retryable() => {
                    warn!(items = pending.len(), attempt, error = %e, "bulk request failed");
                    std::mem::take(&mut pending)
                }
                Err(e) => {
                    error!(items = pending.len(), error = %e, "bulk request failed permanently, dropping batch");
                    let count = pending.len();
                    self.drop_items(&mut report, count);
                    Vec::new()
                }
            };

            let (again, exhausted): (Vec<BulkItem>, Vec<BulkItem>) = retryable
                .into_iter()
                .partition(|item| item.attempts < self.policy.max_attempts);
            for item in &exhausted {
                error!(
                    index = %item.index,
                    attempts = item.attempts,
                    "dropping document after exhausting retries"
                );
            }
            self.drop_items(&mut report, exhausted.len());

            if !again.is_empty() {
                let delay = self.policy.backoff(attempt);
                debug!(items = again.len(), attempt, delay_ms = delay.as_millis() as u64, "retrying bulk items");
                report.retried += again.len();
                self.metrics.record_bulk_retried(again.len() as u64);
                tokio::time::sleep(delay).await;
            }
            pending = again;
        }

        report
    }

    fn drop_items(&self, report: &mut WriteReport, count: usize) {
        if count > 0 {
            report.dropped += count;
            self.metrics.record_bulk_dropped(count as u64);
        }
    }
}

impl std::fmt::Debug for RetryWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryWriter")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::store::{BulkItemResponse, ItemError, ItemResult};
    use crate::error::{BulkError, BulkResult};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use prometheus_client::registry::Registry;
    use std::collections::VecDeque;

    fn ok() -> BulkItemResponse {
        BulkItemResponse {
            index: ItemResult {
                index: None,
                status: 201,
                error: None,
            },
        }
    }

    fn failure(status: u16, kind: &str) -> BulkItemResponse {
        BulkItemResponse {
            index: ItemResult {
                index: None,
                status,
                error: Some(ItemError {
                    kind: kind.to_string(),
                    reason: Some(format!("{} happened", kind)),
                }),
            },
        }
    }

    /// Replays scripted answers and records every submitted batch
    #[derive(Default)]
    struct ScriptedStore {
        answers: Mutex<VecDeque<BulkResult<Vec<BulkItemResponse>>>>,
        batches: Mutex<Vec<Vec<BulkItem>>>,
    }

    impl ScriptedStore {
        fn answer(self, answer: BulkResult<Vec<BulkItemResponse>>) -> Self {
            self.answers.lock().push_back(answer);
            self
        }
    }

    #[async_trait]
    impl IndexStore for ScriptedStore {
        async fn bulk(&self, items: &[BulkItem]) -> BulkResult<BulkResponse> {
            self.batches.lock().push(items.to_vec());
            match self.answers.lock().pop_front() {
                Some(Ok(results)) => Ok(BulkResponse {
                    took: 1,
                    errors: results.iter().any(|r| !r.index.is_success()),
                    items: results,
                }),
                Some(Err(e)) => Err(e),
                None => Ok(BulkResponse::success(items.len())),
            }
        }
    }

    fn items(n: usize) -> Vec<BulkItem> {
        (0..n)
            .map(|i| BulkItem::new("errors", format!(r#"{{"n":{}}}"#, i)))
            .collect()
    }

    fn writer(store: Arc<ScriptedStore>) -> (RetryWriter, ProcessorMetrics) {
        let metrics = ProcessorMetrics::new(&mut Registry::default());
        (
            RetryWriter::new(store, RetryPolicy::default(), metrics.clone()),
            metrics,
        )
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(12), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_result_errors_keeps_store_message() {
        let batch = items(3);
        let response = BulkResponse {
            took: 1,
            errors: true,
            items: vec![ok(), failure(400, "mapper_parsing_exception"), ok()],
        };
        let failed = parse_result_errors(&batch, &response);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].item, batch[1]);
        assert_eq!(failed[0].reason, "mapper_parsing_exception happened");
        assert!(!failed[0].is_retryable());
    }

    #[test]
    fn test_retryable_classification() {
        let item = BulkItem::new("i", "{}");
        let failed = |status: u16, kind: &str| FailedItem {
            item: item.clone(),
            status,
            kind: kind.to_string(),
            reason: String::new(),
        };
        assert!(failed(429, "x").is_retryable());
        assert!(failed(503, "x").is_retryable());
        assert!(failed(400, REJECTED_EXECUTION).is_retryable());
        assert!(!failed(400, "mapper_parsing_exception").is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_indexes_the_rest() {
        let store = Arc::new(ScriptedStore::default().answer(Ok(vec![
            ok(),
            failure(400, "mapper_parsing_exception"),
            ok(),
            failure(400, "illegal_argument_exception"),
            ok(),
        ])));
        let (writer, metrics) = writer(store.clone());

        let report = writer.write(items(5)).await;
        assert_eq!(report.indexed, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(report.dropped, 2);
        assert_eq!(report.retried, 0);
        assert_eq!(store.batches.lock().len(), 1);
        assert_eq!(metrics.snapshot("").bulk_indexed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_item_failures_are_resubmitted() {
        let store = Arc::new(
            ScriptedStore::default()
                .answer(Ok(vec![ok(), failure(429, "too_many_requests"), failure(400, REJECTED_EXECUTION)]))
                .answer(Ok(vec![ok(), ok()])),
        );
        let (writer, _) = writer(store.clone());

        let report = writer.write(items(3)).await;
        assert_eq!(report.indexed, 3);
        assert_eq!(report.retried, 2);
        assert_eq!(report.dropped, 0);

        let batches = store.batches.lock();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].len(), 2);
        assert!(batches[1].iter().all(|i| i.attempts == 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let store = Arc::new(
            ScriptedStore::default()
                .answer(Err(BulkError::Status { status: 503, body: String::new() }))
                .answer(Err(BulkError::Request("connection reset".into())))
                .answer(Err(BulkError::Status { status: 502, body: String::new() })),
        );
        let (writer, metrics) = writer(store.clone());

        let report = writer.write(items(4)).await;
        assert_eq!(report.indexed, 0);
        assert_eq!(report.dropped, 4);
        assert_eq!(report.retried, 8);
        assert_eq!(store.batches.lock().len(), 3);
        assert_eq!(metrics.snapshot("").bulk_dropped, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_request_failure_drops_batch() {
        let store = Arc::new(
            ScriptedStore::default().answer(Err(BulkError::Status { status: 400, body: "bad".into() })),
        );
        let (writer, _) = writer(store.clone());

        let report = writer.write(items(2)).await;
        assert_eq!(report.dropped, 2);
        assert_eq!(store.batches.lock().len(), 1);
    }
}
