//! Construction of a pipeline from its definition
//!
//! Everything that can be wrong with a definition is detected here, once,
//! before any record flows: invalid fields, an unknown aggregate function,
//! an invalid window and sinks whose transport is not configured.

use super::worker::PartitionWorker;
use crate::aggregation::{AggregateFactory, AggregateRegistry};
use crate::error::Result;
use crate::metrics::ProcessorMetrics;
use crate::rules::{FieldRules, MetricRules};
use crate::sink::{SinkRouter, SinkTransports};
use crate::window::assigner_for;
use metricflow_types::ProcessDefinition;
use std::sync::Arc;
use tracing::info;

/// Default capacity of each partition worker's input channel
pub const DEFAULT_WORKER_CAPACITY: usize = 1024;

/// A validated pipeline with its resolved collaborators
pub struct MetricPipeline {
    definition: ProcessDefinition,
    rules: Arc<dyn MetricRules>,
    factory: AggregateFactory,
    router: Arc<SinkRouter>,
    metrics: ProcessorMetrics,
    worker_capacity: usize,
}

impl MetricPipeline {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &ProcessDefinition {
        &self.definition
    }

    pub fn router(&self) -> &Arc<SinkRouter> {
        &self.router
    }

    pub fn metrics(&self) -> &ProcessorMetrics {
        &self.metrics
    }

    pub fn worker_capacity(&self) -> usize {
        self.worker_capacity
    }

    /// Source topic first, then the join topic when there is one
    pub fn topics(&self) -> Vec<String> {
        let mut topics = vec![self.definition.source_topic.clone()];
        if let Some(join) = &self.definition.join {
            if join.topic != self.definition.source_topic {
                topics.push(join.topic.clone());
            }
        }
        topics
    }

    /// Whether `topic` feeds the join side of this pipeline
    pub fn is_join_topic(&self, topic: &str) -> bool {
        self.definition
            .join
            .as_ref()
            .is_some_and(|join| join.topic == topic)
    }

    /// Fresh worker owning its own aggregation and join state
    pub fn worker(&self, partition: i32) -> Result<PartitionWorker> {
        PartitionWorker::new(
            self.definition.name.clone(),
            partition,
            &self.definition,
            self.rules.clone(),
            self.factory.clone(),
            self.router.clone(),
            self.metrics.clone(),
        )
    }
}

impl std::fmt::Debug for MetricPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricPipeline")
            .field("name", &self.definition.name)
            .field("topics", &self.topics())
            .field("router", &self.router)
            .finish()
    }
}

/// Builder for [`MetricPipeline`]
///
/// # Example
///
/// ```rust,no_run
/// use metricflow_types::{AggregationSpec, ProcessDefinition, SinkDescriptor, WindowSpec};
/// use processor::pipeline::PipelineBuilder;
/// use std::time::Duration;
///
/// # fn example() -> processor::ProcessorResult<()> {
/// let definition = ProcessDefinition::new(
///     "sum-per-project",
///     AggregationSpec::new("sum", Some("value")),
///     "metrics",
///     WindowSpec::tumbling(Duration::from_secs(60)),
/// )
/// .with_sink(SinkDescriptor::Console);
///
/// let pipeline = PipelineBuilder::new(definition).build()?;
/// assert_eq!(pipeline.topics(), vec!["metrics".to_string()]);
/// # Ok(())
/// # }
/// ```
pub struct PipelineBuilder {
    definition: ProcessDefinition,
    registry: Option<Arc<AggregateRegistry>>,
    rules: Option<Arc<dyn MetricRules>>,
    transports: SinkTransports,
    metrics: Option<ProcessorMetrics>,
    worker_capacity: usize,
}

impl PipelineBuilder {
    pub fn new(definition: ProcessDefinition) -> Self {
        Self {
            definition,
            registry: None,
            rules: None,
            transports: SinkTransports::default(),
            metrics: None,
            worker_capacity: DEFAULT_WORKER_CAPACITY,
        }
    }

    /// Aggregate functions to resolve against; the built-ins otherwise
    pub fn with_registry(mut self, registry: Arc<AggregateRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Custom rules in place of the definition-driven [`FieldRules`]
    pub fn with_rules(mut self, rules: Arc<dyn MetricRules>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn with_transports(mut self, transports: SinkTransports) -> Self {
        self.transports = transports;
        self
    }

    pub fn with_metrics(mut self, metrics: ProcessorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_worker_capacity(mut self, capacity: usize) -> Self {
        self.worker_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> Result<MetricPipeline> {
        let definition = self.definition;
        definition.validate()?;

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(AggregateRegistry::with_defaults()));
        let factory = registry.resolve(&definition.aggregation.function)?;
        assigner_for(&definition.window)?;

        let metrics = self.metrics.unwrap_or_else(ProcessorMetrics::global);
        let router = SinkRouter::build(
            definition.name.clone(),
            &definition.sinks,
            &self.transports,
            metrics.clone(),
        )?;
        let rules = self
            .rules
            .unwrap_or_else(|| Arc::new(FieldRules::from_definition(&definition)));

        info!(
            pipeline = %definition.name,
            aggregation = %definition.aggregation.descriptor(),
            window = ?definition.window,
            sinks = definition.sinks.len(),
            "pipeline built"
        );

        Ok(MetricPipeline {
            definition,
            rules,
            factory,
            router: Arc::new(router),
            metrics,
            worker_capacity: self.worker_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AggregationError, ProcessorError, SinkError};
    use metricflow_types::{AggregationSpec, JoinSpec, SinkDescriptor, WindowSpec};
    use prometheus_client::registry::Registry;
    use std::time::Duration;

    fn definition(function: &str) -> ProcessDefinition {
        ProcessDefinition::new(
            "sum-per-project",
            AggregationSpec::new(function, Some("value")),
            "metrics",
            WindowSpec::tumbling(Duration::from_secs(60)),
        )
    }

    fn metrics() -> ProcessorMetrics {
        ProcessorMetrics::new(&mut Registry::default())
    }

    #[test]
    fn test_build_and_topics() {
        let pipeline = PipelineBuilder::new(definition("sum").with_join(JoinSpec::new("releases")))
            .with_metrics(metrics())
            .build()
            .unwrap();

        assert_eq!(pipeline.name(), "sum-per-project");
        assert_eq!(pipeline.topics(), vec!["metrics".to_string(), "releases".to_string()]);
        assert!(pipeline.is_join_topic("releases"));
        assert!(!pipeline.is_join_topic("metrics"));
    }

    #[test]
    fn test_unknown_function_fails_build() {
        let err = PipelineBuilder::new(definition("mode"))
            .with_metrics(metrics())
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessorError::Aggregation(AggregationError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn test_unconfigured_sink_fails_build() {
        let err = PipelineBuilder::new(definition("sum").with_sink(SinkDescriptor::Bus {
            topic: "out".into(),
        }))
        .with_metrics(metrics())
        .build()
        .unwrap_err();
        assert!(matches!(err, ProcessorError::Sink(SinkError::NotConfigured("bus"))));
    }

    #[test]
    fn test_invalid_definition_fails_build() {
        let mut invalid = definition("sum");
        invalid.source_topic = String::new();
        let err = PipelineBuilder::new(invalid)
            .with_metrics(metrics())
            .build()
            .unwrap_err();
        assert!(matches!(err, ProcessorError::Model(_)));
    }
}
