//! Process-level wiring of every pipeline from the configuration

use super::builder::PipelineBuilder;
use super::executor::PipelineExecutor;
use crate::aggregation::AggregateRegistry;
use crate::bulk::{BulkIndexWriter, BulkWriterConfig, HttpIndexStore};
use crate::error::Result;
use crate::error_pipeline::ErrorIndexProcessor;
use crate::kafka::{KafkaBusPublisher, KafkaSource, KafkaSourceConfig};
use crate::metrics::{MetricsServer, MetricsServerConfig, ProcessorMetrics};
use crate::sink::{SinkTransports, SmtpMailTransport, UdpTrapSender, WebhookChatClient};
use metricflow_config::MetricflowConfig;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const PUBLISHER_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs all configured pipelines, the error pipeline and the metrics
/// endpoint until cancelled.
pub struct Runtime {
    config: MetricflowConfig,
    metrics: ProcessorMetrics,
    registry: Arc<AggregateRegistry>,
}

impl Runtime {
    pub fn new(config: MetricflowConfig) -> Self {
        Self {
            config,
            metrics: ProcessorMetrics::global(),
            registry: Arc::new(AggregateRegistry::with_defaults()),
        }
    }

    pub fn with_registry(mut self, registry: Arc<AggregateRegistry>) -> Self {
        self.registry = registry;
        self
    }

    fn sink_kinds(&self) -> HashSet<&'static str> {
        self.config
            .pipelines
            .iter()
            .flat_map(|p| p.sinks.iter().map(|s| s.kind()))
            .collect()
    }

    /// Build the clients the configured sinks need; failures are fatal
    fn transports(
        &self,
        writer: &Arc<BulkIndexWriter>,
        bus: &Option<Arc<KafkaBusPublisher>>,
    ) -> Result<SinkTransports> {
        let kinds = self.sink_kinds();
        let mut transports = SinkTransports::default().with_index_writer(writer.clone());

        if let Some(bus) = bus {
            transports = transports.with_bus(bus.clone());
        }
        if kinds.contains("email") {
            transports = transports.with_mail(Arc::new(SmtpMailTransport::new(&self.config.smtp)?));
        }
        if kinds.contains("chat") {
            let client = WebhookChatClient::new(self.config.chat.request_timeout())?;
            transports = transports.with_chat(Arc::new(client));
        }
        if kinds.contains("trap") {
            transports = transports.with_trap(Arc::new(UdpTrapSender::new(
                self.config.trap.bind_address.clone(),
            )));
        }
        Ok(transports)
    }

    /// Start everything and block until `shutdown` is cancelled and every
    /// component has flushed.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let kafka = &self.config.kafka;

        let store = HttpIndexStore::new(&self.config.search_index)?;
        let writer = Arc::new(BulkIndexWriter::new(
            Arc::new(store),
            BulkWriterConfig::from(&self.config.search_index),
            self.metrics.clone(),
        ));
        let bus = if self.sink_kinds().contains("bus") {
            Some(Arc::new(KafkaBusPublisher::new(kafka)?))
        } else {
            None
        };
        let transports = self.transports(&writer, &bus)?;

        let mut tasks = JoinSet::new();

        for definition in &self.config.pipelines {
            let pipeline = PipelineBuilder::new(definition.clone())
                .with_registry(self.registry.clone())
                .with_transports(transports.clone())
                .with_metrics(self.metrics.clone())
                .with_worker_capacity(kafka.channel_capacity)
                .build()?;

            let source = KafkaSource::new(KafkaSourceConfig::new(
                kafka,
                format!("{}-{}", kafka.group_id, pipeline.name()),
                pipeline.topics(),
            ))?;
            source.subscribe()?;

            let (tx, rx) = mpsc::channel(kafka.channel_capacity.max(1));
            let token = shutdown.clone();
            tasks.spawn(async move {
                if let Err(e) = source.run(tx, token).await {
                    error!(error = %e, "source failed");
                }
            });
            let executor = PipelineExecutor::new(Arc::new(pipeline));
            let token = shutdown.clone();
            tasks.spawn(async move {
                if let Err(e) = executor.run(rx, token).await {
                    error!(error = %e, "pipeline failed");
                }
            });
        }

        let error_source = KafkaSource::new(KafkaSourceConfig::new(
            kafka,
            format!("{}-errors", kafka.group_id),
            vec![kafka.error_topic.clone()],
        ))?;
        error_source.subscribe()?;
        let (error_tx, error_rx) = mpsc::channel(kafka.channel_capacity.max(1));
        let token = shutdown.clone();
        tasks.spawn(async move {
            if let Err(e) = error_source.run(error_tx, token).await {
                error!(error = %e, "error source failed");
            }
        });
        let errors = ErrorIndexProcessor::new(writer.clone(), self.metrics.clone());
        let token = shutdown.clone();
        tasks.spawn(async move { errors.run(error_rx, token).await });

        if self.config.metrics.enabled {
            let server = MetricsServer::new(MetricsServerConfig::from(&self.config.metrics));
            let ready = server.readiness();
            let token = shutdown.clone();
            tasks.spawn(async move {
                if let Err(e) = server.start(token).await {
                    error!(error = %e, "metrics server failed");
                }
            });
            ready.store(true, Ordering::Release);
        }

        info!(pipelines = self.config.pipelines.len(), "metricflow running");
        shutdown.cancelled().await;
        info!("shutting down");

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "task ended abnormally");
            }
        }

        let report = writer.shutdown().await;
        if let Some(bus) = &bus {
            bus.flush(PUBLISHER_FLUSH_TIMEOUT);
        }
        info!(
            indexed = report.indexed,
            dropped = report.dropped,
            "metricflow stopped"
        );
        Ok(())
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("pipelines", &self.config.pipelines.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metricflow_types::{AggregationSpec, ProcessDefinition, SinkDescriptor, WindowSpec};

    #[test]
    fn test_sink_kinds_across_pipelines() {
        let window = WindowSpec::tumbling(Duration::from_secs(60));
        let mut config = MetricflowConfig::default();
        config.pipelines = vec![
            ProcessDefinition::new("a", AggregationSpec::new("sum", Some("value")), "metrics", window)
                .with_sink(SinkDescriptor::Console)
                .with_sink(SinkDescriptor::Bus { topic: "out".into() }),
            ProcessDefinition::new("b", AggregationSpec::new("count", None), "logs", window)
                .with_sink(SinkDescriptor::Console),
        ];

        let kinds = Runtime::new(config).sink_kinds();
        assert_eq!(kinds, HashSet::from(["console", "bus"]));
    }
}
