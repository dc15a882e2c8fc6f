//! Processor counters
//!
//! All counters are monotonic and process-wide. They are registered once
//! in the global [`MetricsRegistry`]; [`ProcessorMetrics::global`] hands out
//! cheap clones sharing the same atomics.

use super::labels::{OutcomeLabels, PipelineLabels, ReasonLabels, SinkLabels};
use super::registry::MetricsRegistry;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use std::sync::OnceLock;

static PROCESSOR_METRICS: OnceLock<ProcessorMetrics> = OnceLock::new();

#[derive(Debug, Clone, Default)]
pub struct ProcessorMetrics {
    metric_input: Family<PipelineLabels, Counter>,
    metric_output: Family<PipelineLabels, Counter>,
    record_outcomes: Family<OutcomeLabels, Counter>,
    having_rejected: Family<PipelineLabels, Counter>,
    join_records: Family<OutcomeLabels, Counter>,
    sink_deliveries: Family<SinkLabels, Counter>,
    sink_failures: Family<SinkLabels, Counter>,
    source_decode_failures: Family<PipelineLabels, Counter>,
    bulk_indexed: Counter,
    bulk_failed: Counter,
    bulk_retried: Counter,
    bulk_dropped: Counter,
    error_records_dropped: Family<ReasonLabels, Counter>,
}

impl ProcessorMetrics {
    /// Create the counters and register them in `registry`
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Self::default();

        registry.register(
            "metric_input",
            "Records entering the aggregation stage",
            metrics.metric_input.clone(),
        );
        registry.register(
            "metric_output",
            "Results leaving the aggregation stage after join and having",
            metrics.metric_output.clone(),
        );
        registry.register(
            "record_outcomes",
            "Aggregation stage outcome per record",
            metrics.record_outcomes.clone(),
        );
        registry.register(
            "having_rejected",
            "Window results rejected by the having predicate",
            metrics.having_rejected.clone(),
        );
        registry.register(
            "join_records",
            "Join topic records by outcome",
            metrics.join_records.clone(),
        );
        registry.register(
            "sink_deliveries",
            "Successful sink deliveries",
            metrics.sink_deliveries.clone(),
        );
        registry.register(
            "sink_failures",
            "Failed sink deliveries",
            metrics.sink_failures.clone(),
        );
        registry.register(
            "source_decode_failures",
            "Source messages that were not valid JSON",
            metrics.source_decode_failures.clone(),
        );
        registry.register(
            "bulk_indexed",
            "Documents acknowledged by the index store",
            metrics.bulk_indexed.clone(),
        );
        registry.register(
            "bulk_failed",
            "Per-item failures reported by the index store",
            metrics.bulk_failed.clone(),
        );
        registry.register(
            "bulk_retried",
            "Documents resubmitted after a retryable failure",
            metrics.bulk_retried.clone(),
        );
        registry.register(
            "bulk_dropped",
            "Documents given up on",
            metrics.bulk_dropped.clone(),
        );
        registry.register(
            "error_records_dropped",
            "Error records rejected before indexing",
            metrics.error_records_dropped.clone(),
        );

        metrics
    }

    /// Counters registered in the global registry
    pub fn global() -> Self {
        PROCESSOR_METRICS
            .get_or_init(|| {
                let registry = MetricsRegistry::global().registry();
                let mut registry = registry.write();
                Self::new(&mut registry)
            })
            .clone()
    }

    pub fn record_input(&self, pipeline: &str) {
        self.metric_input.get_or_create(&PipelineLabels::new(pipeline)).inc();
    }

    pub fn record_output(&self, pipeline: &str) {
        self.metric_output.get_or_create(&PipelineLabels::new(pipeline)).inc();
    }

    pub fn record_outcome(&self, pipeline: &str, outcome: &str, reason: &str) {
        self.record_outcomes
            .get_or_create(&OutcomeLabels::new(pipeline, outcome, reason))
            .inc();
    }

    pub fn record_having_rejected(&self, pipeline: &str) {
        self.having_rejected.get_or_create(&PipelineLabels::new(pipeline)).inc();
    }

    pub fn record_join(&self, pipeline: &str, outcome: &str) {
        self.join_records
            .get_or_create(&OutcomeLabels::new(pipeline, outcome, ""))
            .inc();
    }

    pub fn record_sink_delivery(&self, pipeline: &str, sink: &str) {
        self.sink_deliveries.get_or_create(&SinkLabels::new(pipeline, sink)).inc();
    }

    pub fn record_sink_failure(&self, pipeline: &str, sink: &str) {
        self.sink_failures.get_or_create(&SinkLabels::new(pipeline, sink)).inc();
    }

    pub fn record_decode_failure(&self, pipeline: &str) {
        self.source_decode_failures
            .get_or_create(&PipelineLabels::new(pipeline))
            .inc();
    }

    pub fn record_bulk_indexed(&self, count: u64) {
        self.bulk_indexed.inc_by(count);
    }

    pub fn record_bulk_failed(&self, count: u64) {
        self.bulk_failed.inc_by(count);
    }

    pub fn record_bulk_retried(&self, count: u64) {
        self.bulk_retried.inc_by(count);
    }

    pub fn record_bulk_dropped(&self, count: u64) {
        self.bulk_dropped.inc_by(count);
    }

    pub fn record_error_dropped(&self, reason: &str) {
        self.error_records_dropped
            .get_or_create(&ReasonLabels::new(reason))
            .inc();
    }

    /// Current values, mostly for tests and the CLI summary
    pub fn snapshot(&self, pipeline: &str) -> MetricsSnapshot {
        let labels = PipelineLabels::new(pipeline);
        MetricsSnapshot {
            metric_input: self.metric_input.get_or_create(&labels).get(),
            metric_output: self.metric_output.get_or_create(&labels).get(),
            bulk_indexed: self.bulk_indexed.get(),
            bulk_failed: self.bulk_failed.get(),
            bulk_retried: self.bulk_retried.get(),
            bulk_dropped: self.bulk_dropped.get(),
        }
    }

    pub fn outcome_count(&self, pipeline: &str, outcome: &str, reason: &str) -> u64 {
        self.record_outcomes
            .get_or_create(&OutcomeLabels::new(pipeline, outcome, reason))
            .get()
    }

    pub fn sink_failure_count(&self, pipeline: &str, sink: &str) -> u64 {
        self.sink_failures.get_or_create(&SinkLabels::new(pipeline, sink)).get()
    }

    pub fn sink_delivery_count(&self, pipeline: &str, sink: &str) -> u64 {
        self.sink_deliveries.get_or_create(&SinkLabels::new(pipeline, sink)).get()
    }

    pub fn error_dropped_count(&self, reason: &str) -> u64 {
        self.error_records_dropped
            .get_or_create(&ReasonLabels::new(reason))
            .get()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub metric_input: u64,
    pub metric_output: u64,
    pub bulk_indexed: u64,
    pub bulk_failed: u64,
    pub bulk_retried: u64,
    pub bulk_dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_shared_between_clones() {
        let mut registry = Registry::default();
        let metrics = ProcessorMetrics::new(&mut registry);
        let clone = metrics.clone();

        clone.record_input("p");
        clone.record_input("p");
        metrics.record_output("p");
        metrics.record_bulk_indexed(3);

        let snapshot = metrics.snapshot("p");
        assert_eq!(snapshot.metric_input, 2);
        assert_eq!(snapshot.metric_output, 1);
        assert_eq!(snapshot.bulk_indexed, 3);
        assert_eq!(metrics.snapshot("other").metric_input, 0);
    }

    #[test]
    fn test_exposition_names() {
        let mut registry = Registry::default();
        let metrics = ProcessorMetrics::new(&mut registry);
        metrics.record_input("sum-per-project");
        metrics.record_sink_failure("sum-per-project", "search_index");

        let mut text = String::new();
        prometheus_client::encoding::text::encode(&mut text, &registry).unwrap();
        assert!(text.contains("metric_input_total{pipeline=\"sum-per-project\"} 1"));
        assert!(text.contains("sink_failures_total{pipeline=\"sum-per-project\",sink=\"search_index\"} 1"));
    }

    #[test]
    fn test_global_is_registered_once() {
        let a = ProcessorMetrics::global();
        let b = ProcessorMetrics::global();
        let before = b.snapshot("global-test").metric_input;
        a.record_input("global-test");
        assert_eq!(b.snapshot("global-test").metric_input, before + 1);
    }
}
