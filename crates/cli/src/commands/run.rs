//! `run` - run every configured pipeline until interrupted

use anyhow::Context;
use clap::Args;
use metricflow_config::MetricflowConfig;
use processor::Runtime;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Args, Debug, Clone)]
pub struct RunCommand {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", env = "METRICFLOW_CONFIG")]
    pub config: Option<PathBuf>,
}

impl RunCommand {
    pub async fn execute(&self) -> anyhow::Result<()> {
        let config = MetricflowConfig::load(self.config.clone()).context("loading configuration")?;
        config.validate().context("invalid configuration")?;
        info!(
            pipelines = config.pipelines.len(),
            brokers = %config.kafka.brokers,
            search_index = %config.search_index.url,
            "configuration loaded"
        );

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("interrupt received"),
                Err(e) => warn!(error = %e, "cannot listen for interrupt, stopping"),
            }
            signal.cancel();
        });

        Runtime::new(config)
            .run(shutdown)
            .await
            .context("runtime failed")
    }
}
