//! Per-partition processing task

use crate::aggregation::AggregateFactory;
use crate::aggregator::{RecordOutcome, WindowedAggregator};
use crate::error::Result;
use crate::join::{JoinStage, SecondaryOutcome};
use crate::metrics::ProcessorMetrics;
use crate::result::MetricResult;
use crate::rules::MetricRules;
use crate::sink::SinkRouter;
use crate::transform;
use metricflow_types::{ProcessDefinition, Record, TransformationSpec};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A decoded record addressed to one side of the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerInput {
    Primary(Record),
    Secondary(Record),
}

/// Owns the aggregation and join state of one source partition.
///
/// Records are handled strictly in arrival order. The only awaits are sink
/// deliveries of results closed by a record.
pub struct PartitionWorker {
    pipeline: String,
    partition: i32,
    rules: Arc<dyn MetricRules>,
    transformations: Vec<TransformationSpec>,
    aggregator: WindowedAggregator,
    join: Option<JoinStage>,
    router: Arc<SinkRouter>,
    metrics: ProcessorMetrics,
}

impl PartitionWorker {
    pub(crate) fn new(
        pipeline: String,
        partition: i32,
        definition: &ProcessDefinition,
        rules: Arc<dyn MetricRules>,
        factory: AggregateFactory,
        router: Arc<SinkRouter>,
        metrics: ProcessorMetrics,
    ) -> Result<Self> {
        let aggregator = WindowedAggregator::new(
            rules.clone(),
            factory,
            &definition.window,
            Duration::from_millis(definition.allowed_lateness_ms),
        )?;
        let join = definition
            .join
            .as_ref()
            .map(|spec| JoinStage::new(rules.clone(), spec));

        Ok(Self {
            pipeline,
            partition,
            rules,
            transformations: definition.transformations.clone(),
            aggregator,
            join,
            router,
            metrics,
        })
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Run one input through the stages and return the results it released
    pub fn handle(&mut self, input: WorkerInput) -> Vec<MetricResult> {
        match input {
            WorkerInput::Primary(mut record) => {
                transform::apply_all(&self.pipeline, &self.transformations, &mut record);

                let outcome = self.aggregator.process(&record);
                // input counts records that passed the filters
                if !matches!(outcome, RecordOutcome::Filtered) {
                    self.metrics.record_input(&self.pipeline);
                }
                let reason = match outcome {
                    RecordOutcome::Dropped(reason) => reason.as_str(),
                    _ => "",
                };
                self.metrics
                    .record_outcome(&self.pipeline, outcome.as_str(), reason);

                let closed = self.aggregator.take_closed();
                self.join_results(closed.into_iter().map(MetricResult::from).collect())
            }
            WorkerInput::Secondary(record) => {
                let Some(join) = self.join.as_mut() else {
                    debug!(pipeline = %self.pipeline, "secondary record without a join, ignored");
                    return Vec::new();
                };
                let (outcome, emitted) = join.push_secondary(&record);
                let label = match outcome {
                    SecondaryOutcome::Filtered => "filtered",
                    SecondaryOutcome::MissingTimestamp => "missing_timestamp",
                    SecondaryOutcome::Late => "late",
                    SecondaryOutcome::Buffered => "buffered",
                };
                self.metrics.record_join(&self.pipeline, label);
                emitted
            }
        }
    }

    /// Finalize every open window and release the join buffers
    pub fn drain(&mut self) -> Vec<MetricResult> {
        let open = self.aggregator.flush_all();
        let mut results = self.join_results(open.into_iter().map(MetricResult::from).collect());
        if let Some(join) = self.join.as_mut() {
            results.extend(join.flush_all());
        }
        results
    }

    fn join_results(&mut self, results: Vec<MetricResult>) -> Vec<MetricResult> {
        match self.join.as_mut() {
            Some(join) => results
                .into_iter()
                .flat_map(|result| join.push_result(result))
                .collect(),
            None => results,
        }
    }

    /// Apply the having filter and route the survivors; returns how many
    /// results were routed.
    pub async fn emit(&self, results: Vec<MetricResult>) -> usize {
        let mut routed = 0;
        for result in results {
            match self.rules.having(&result.keys, result.value) {
                Ok(true) => {}
                Ok(false) => {
                    self.metrics.record_having_rejected(&self.pipeline);
                    debug!(key = %result.keys, value = result.value, "rejected by having");
                    continue;
                }
                Err(e) => {
                    self.metrics.record_having_rejected(&self.pipeline);
                    warn!(
                        pipeline = %self.pipeline,
                        key = %result.keys,
                        window = %result.window,
                        error = %e,
                        "having predicate failed"
                    );
                    continue;
                }
            }

            self.metrics.record_output(&self.pipeline);
            self.router.route(&result).await;
            routed += 1;
        }
        routed
    }

    /// Process inputs until the channel closes, then flush open windows
    pub async fn run(mut self, mut rx: mpsc::Receiver<WorkerInput>) {
        debug!(pipeline = %self.pipeline, partition = self.partition, "partition worker started");
        while let Some(input) = rx.recv().await {
            let results = self.handle(input);
            if !results.is_empty() {
                self.emit(results).await;
            }
        }

        let results = self.drain();
        let flushed = self.emit(results).await;
        info!(
            pipeline = %self.pipeline,
            partition = self.partition,
            flushed,
            "partition worker stopped"
        );
    }
}

impl std::fmt::Debug for PartitionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionWorker")
            .field("pipeline", &self.pipeline)
            .field("partition", &self.partition)
            .field("open_windows", &self.aggregator.open_windows())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineBuilder;
    use metricflow_types::{
        AggregationSpec, Comparison, FieldPredicate, HavingSpec, JoinMode, JoinSpec, PredicateOp,
        SinkDescriptor, WindowSpec,
    };
    use prometheus_client::registry::Registry;
    use serde_json::json;

    fn record(project: &str, value: f64, at_ms: i64) -> Record {
        Record::new(json!({ "project": project, "value": value })).with_timestamp(at_ms)
    }

    fn worker(definition: ProcessDefinition) -> (PartitionWorker, ProcessorMetrics) {
        let metrics = ProcessorMetrics::new(&mut Registry::default());
        let pipeline = PipelineBuilder::new(definition)
            .with_metrics(metrics.clone())
            .build()
            .unwrap();
        (pipeline.worker(0).unwrap(), metrics)
    }

    fn sum_definition() -> ProcessDefinition {
        ProcessDefinition::new(
            "sum-per-project",
            AggregationSpec::new("sum", Some("value")),
            "metrics",
            WindowSpec::tumbling(Duration::from_secs(60)),
        )
        .with_sink(SinkDescriptor::Console)
    }

    #[tokio::test]
    async fn test_window_closes_on_later_record() {
        let (mut worker, metrics) = worker(sum_definition());

        assert!(worker.handle(WorkerInput::Primary(record("toto", 5.0, 1_000))).is_empty());
        assert!(worker.handle(WorkerInput::Primary(record("toto", 7.0, 2_000))).is_empty());
        let results = worker.handle(WorkerInput::Primary(record("toto", 1.0, 61_000)));

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].value, 12.0);
        assert_eq!(results[0].keys.project(), "toto");
        assert_eq!(worker.emit(results).await, 1);

        let snapshot = metrics.snapshot("sum-per-project");
        assert_eq!(snapshot.metric_input, 3);
        assert_eq!(snapshot.metric_output, 1);
        assert_eq!(metrics.outcome_count("sum-per-project", "aggregated", ""), 3);
    }

    #[test]
    fn test_filtered_records_are_not_input() {
        let definition = sum_definition()
            .with_filter(FieldPredicate::new("project", PredicateOp::Eq, json!("keep")));
        let (mut worker, metrics) = worker(definition);

        for n in 0..5 {
            worker.handle(WorkerInput::Primary(record(&format!("other-{}", n), 1.0, 1_000)));
        }
        worker.handle(WorkerInput::Primary(record("keep", 1.0, 1_000)));

        assert_eq!(metrics.snapshot("sum-per-project").metric_input, 1);
        assert_eq!(metrics.outcome_count("sum-per-project", "filtered", ""), 5);
    }

    #[tokio::test]
    async fn test_having_rejects_before_routing() {
        let definition = sum_definition().with_having(HavingSpec::new(Comparison::Gt, 100.0));
        let (mut worker, metrics) = worker(definition);

        worker.handle(WorkerInput::Primary(record("toto", 5.0, 1_000)));
        let results = worker.drain();
        assert_eq!(results.len(), 1);
        assert_eq!(worker.emit(results).await, 0);
        assert_eq!(metrics.snapshot("sum-per-project").metric_output, 0);
    }

    #[test]
    fn test_left_join_attaches_secondary() {
        let definition = sum_definition().with_join(JoinSpec::new("releases").with_mode(JoinMode::Left));
        let (mut worker, _) = worker(definition);

        worker.handle(WorkerInput::Primary(record("toto", 5.0, 1_000)));
        worker.handle(WorkerInput::Secondary(
            Record::new(json!({ "project": "toto", "version": "1.2.0" })).with_timestamp(59_000),
        ));
        let results = worker.handle(WorkerInput::Primary(record("toto", 1.0, 61_000)));

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].element.as_ref().unwrap()["version"], "1.2.0");
    }

    #[test]
    fn test_secondary_without_join_is_ignored() {
        let (mut worker, _) = worker(sum_definition());
        let released = worker.handle(WorkerInput::Secondary(record("toto", 1.0, 1_000)));
        assert!(released.is_empty());
    }

    #[test]
    fn test_transformations_run_before_keying() {
        let definition = ProcessDefinition::new(
            "count-per-day",
            AggregationSpec::new("count", None),
            "metrics",
            WindowSpec::tumbling(Duration::from_secs(60)),
        )
        .with_transformation(TransformationSpec::FormatDate {
            field: "project".into(),
            source_format: "%Y-%m-%d".into(),
            target_format: "%Y/%m".into(),
        });
        let (mut worker, _) = worker(definition);

        worker.handle(WorkerInput::Primary(
            Record::new(json!({ "project": "2024-03-05" })).with_timestamp(1_000),
        ));
        let results = worker.drain();
        assert_eq!(results[0].keys.project(), "2024/03");
    }
}
