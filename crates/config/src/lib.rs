//! Configuration management for metricflow

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use metricflow_types::ProcessDefinition;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main metricflow configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MetricflowConfig {
    /// Message bus settings
    pub kafka: KafkaConfig,

    /// Search-index store settings
    pub search_index: SearchIndexConfig,

    /// Outgoing mail settings
    pub smtp: SmtpConfig,

    /// Chat webhook settings
    pub chat: ChatConfig,

    /// SNMP trap settings
    pub trap: TrapConfig,

    /// Prometheus endpoint
    pub metrics: MetricsConfig,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Aggregation pipelines
    pub pipelines: Vec<ProcessDefinition>,
}

impl MetricflowConfig {
    /// Load configuration from defaults, an optional YAML file and the environment
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(MetricflowConfig::default()));

        if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::LoadError(format!(
                    "configuration file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Yaml::file(path));
        }

        // Override with environment variables (prefixed with METRICFLOW_)
        figment = figment.merge(Env::prefixed("METRICFLOW_").split("__"));

        figment.extract().map_err(|e| ConfigError::LoadError(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.kafka.brokers.trim().is_empty() {
            return Err(ConfigError::ValidationError("Kafka brokers required".to_string()));
        }

        if self.kafka.group_id.trim().is_empty() {
            return Err(ConfigError::ValidationError("Kafka group id required".to_string()));
        }

        if !(self.search_index.url.starts_with("http://")
            || self.search_index.url.starts_with("https://"))
        {
            return Err(ConfigError::ValidationError(format!(
                "Invalid search index url: {}",
                self.search_index.url
            )));
        }

        if self.search_index.max_items == 0 {
            return Err(ConfigError::ValidationError(
                "search_index.max_items must be positive".to_string(),
            ));
        }

        if self.search_index.flush_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "search_index.flush_interval_ms must be positive".to_string(),
            ));
        }

        if self.search_index.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "search_index.retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.chat.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "chat.request_timeout_ms must be positive".to_string(),
            ));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::ValidationError("Invalid metrics port".to_string()));
        }

        let mut names = HashSet::new();
        for pipeline in &self.pipelines {
            pipeline
                .validate()
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
            if !names.insert(pipeline.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate pipeline name: {}",
                    pipeline.name
                )));
            }
        }

        Ok(())
    }
}

/// Kafka configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Bootstrap servers
    pub brokers: String,

    /// Consumer group id; each pipeline appends its own name
    pub group_id: String,

    /// Topic the error pipeline consumes
    pub error_topic: String,

    /// Offset reset policy for new groups
    pub auto_offset_reset: String,

    pub session_timeout_ms: u64,

    /// Producer delivery timeout
    pub message_timeout_ms: u64,

    /// Publish attempts before a bus delivery is given up
    pub send_retries: u32,

    /// Per-partition worker queue depth
    pub channel_capacity: usize,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "metricflow".to_string(),
            error_topic: "errors".to_string(),
            auto_offset_reset: "earliest".to_string(),
            session_timeout_ms: 6000,
            message_timeout_ms: 5000,
            send_retries: 3,
            channel_capacity: 1024,
        }
    }
}

/// Search-index store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchIndexConfig {
    /// Base url of the store
    pub url: String,

    pub username: Option<String>,

    pub password: Option<String>,

    /// Buffered documents that trigger an eager flush
    pub max_items: usize,

    /// Periodic flush interval
    pub flush_interval_ms: u64,

    pub request_timeout_ms: u64,

    pub retry: RetryConfig,
}

impl SearchIndexConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for SearchIndexConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            username: None,
            password: None,
            max_items: 500,
            flush_interval_ms: 5000,
            request_timeout_ms: 10_000,
            retry: RetryConfig::default(),
        }
    }
}

/// Retry policy for failed bulk items
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

/// SMTP configuration for the email sink
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub from: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Upgrade the connection with STARTTLS
    pub starttls: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 25,
            from: "metricflow@localhost".to_string(),
            username: None,
            password: None,
            starttls: false,
        }
    }
}

/// Chat webhook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Timeout of a single webhook post
    pub request_timeout_ms: u64,
}

impl ChatConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5000,
        }
    }
}

/// SNMP trap configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrapConfig {
    /// Local address the trap socket binds to
    pub bind_address: String,
}

impl Default for TrapConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:0".to_string(),
        }
    }
}

/// Metrics endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            port: 9090,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,

    /// Enable structured JSON logging
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
