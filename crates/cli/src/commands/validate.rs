//! `validate` - load a configuration and build every pipeline without
//! connecting to anything

use anyhow::Context;
use clap::Args;
use colored::Colorize;
use metricflow_config::MetricflowConfig;
use processor::pipeline::PipelineBuilder;
use processor::sink::{ChatClient, MailTransport, SinkTransports, TrapSender};
use processor::{BulkIndexWriter, BusPublisher, IndexStore, ProcessorMetrics};
use prometheus_client::registry::Registry;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug, Clone)]
pub struct ValidateCommand {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,
}

impl ValidateCommand {
    pub async fn execute(&self) -> anyhow::Result<()> {
        let config = MetricflowConfig::load(Some(self.config.clone()))
            .with_context(|| format!("loading {}", self.config.display()))?;
        let names = check(&config)?;

        println!(
            "{} {} ({} pipelines)",
            "✓".green(),
            self.config.display(),
            names.len()
        );
        for name in names {
            println!("  {}", name);
        }
        Ok(())
    }
}

/// Validate the configuration and build each pipeline against offline
/// transports, returning the pipeline names.
pub fn check(config: &MetricflowConfig) -> anyhow::Result<Vec<String>> {
    config.validate().context("invalid configuration")?;

    let metrics = ProcessorMetrics::new(&mut Registry::default());
    let transports = offline::transports(metrics.clone());
    config
        .pipelines
        .iter()
        .map(|definition| {
            let pipeline = PipelineBuilder::new(definition.clone())
                .with_transports(transports.clone())
                .with_metrics(metrics.clone())
                .build()
                .with_context(|| format!("pipeline {}", definition.name))?;
            Ok(pipeline.name().to_string())
        })
        .collect()
}

/// Transports that accept everything; used only to resolve sinks
mod offline {
    use super::*;
    use async_trait::async_trait;
    use processor::bulk::{BulkItem, BulkResponse, BulkWriterConfig};
    use processor::error::BulkResult;

    struct Offline;

    #[async_trait]
    impl BusPublisher for Offline {
        async fn publish(&self, _topic: &str, _key: &str, _payload: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl IndexStore for Offline {
        async fn bulk(&self, items: &[BulkItem]) -> BulkResult<BulkResponse> {
            Ok(BulkResponse::success(items.len()))
        }
    }

    #[async_trait]
    impl MailTransport for Offline {
        async fn send(&self, _to: &str, _subject: &str, _body: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl ChatClient for Offline {
        async fn post(&self, _webhook_url: &str, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl TrapSender for Offline {
        async fn send(&self, _target: &str, _community: &str, _oid: &str, _message: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    pub fn transports(metrics: ProcessorMetrics) -> SinkTransports {
        let writer = BulkIndexWriter::new(Arc::new(Offline), BulkWriterConfig::default(), metrics);
        SinkTransports::default()
            .with_bus(Arc::new(Offline))
            .with_index_writer(Arc::new(writer))
            .with_mail(Arc::new(Offline))
            .with_chat(Arc::new(Offline))
            .with_trap(Arc::new(Offline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(yaml: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_valid_configuration() {
        let file = write_config(
            r#"
pipelines:
  - name: sum-per-project
    aggregation:
      function: sum
      field: value
    source_topic: metrics
    window:
      type: tumbling
      size_ms: 60000
    sinks:
      - type: bus
        topic: out
      - type: console
"#,
        );
        let config = MetricflowConfig::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(check(&config).unwrap(), vec!["sum-per-project".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_function_is_reported() {
        let file = write_config(
            r#"
pipelines:
  - name: broken
    aggregation:
      function: mode
      field: value
    source_topic: metrics
    window:
      type: tumbling
      size_ms: 60000
"#,
        );
        let config = MetricflowConfig::load(Some(file.path().to_path_buf())).unwrap();
        let err = check(&config).unwrap_err();
        assert!(format!("{:#}", err).contains("unknown aggregate function: mode"));
    }
}
