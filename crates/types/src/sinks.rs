//! Output sink descriptors

use crate::errors::{ModelError, Result};
use crate::retention::RetentionLevel;
use serde::{Deserialize, Serialize};

/// Enterprise OID used for traps when none is configured
pub const DEFAULT_TRAP_OID: &str = "1.3.6.1.4.1.8072.9999.1";

/// Where a pipeline's results are delivered.
///
/// A process definition owns any number of these; each is invoked
/// independently for every result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkDescriptor {
    /// Publish to a bus topic
    Bus { topic: String },

    /// Bulk-index into the search store
    SearchIndex {
        #[serde(default = "default_index")]
        index: String,
        #[serde(default)]
        retention: RetentionLevel,
    },

    /// Send an email rendered from a template
    Email {
        address: String,
        #[serde(default)]
        subject: Option<String>,
        template: String,
    },

    /// Post to a chat webhook
    Chat { webhook_url: String, template: String },

    /// Emit an SNMP trap
    Trap {
        target: String,
        #[serde(default = "default_community")]
        community: String,
        #[serde(default = "default_oid")]
        oid: String,
    },

    /// Log the result
    Console,
}

fn default_index() -> String {
    "metrics".to_string()
}

fn default_community() -> String {
    "public".to_string()
}

fn default_oid() -> String {
    DEFAULT_TRAP_OID.to_string()
}

impl SinkDescriptor {
    /// Short name used in logs and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            SinkDescriptor::Bus { .. } => "bus",
            SinkDescriptor::SearchIndex { .. } => "search_index",
            SinkDescriptor::Email { .. } => "email",
            SinkDescriptor::Chat { .. } => "chat",
            SinkDescriptor::Trap { .. } => "trap",
            SinkDescriptor::Console => "console",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            SinkDescriptor::Bus { topic } if topic.trim().is_empty() => {
                Err(ModelError::InvalidSink("bus topic is empty".to_string()))
            }
            SinkDescriptor::SearchIndex { index, .. } if index.trim().is_empty() => {
                Err(ModelError::InvalidSink("search index name is empty".to_string()))
            }
            SinkDescriptor::Email { address, .. } if !address.contains('@') => Err(
                ModelError::InvalidSink(format!("invalid email address: {}", address)),
            ),
            SinkDescriptor::Chat { webhook_url, .. }
                if !(webhook_url.starts_with("http://") || webhook_url.starts_with("https://")) =>
            {
                Err(ModelError::InvalidSink(format!(
                    "invalid webhook url: {}",
                    webhook_url
                )))
            }
            SinkDescriptor::Trap { target, oid, .. } => {
                if target.trim().is_empty() {
                    return Err(ModelError::InvalidSink("trap target is empty".to_string()));
                }
                if oid.split('.').any(|arc| arc.parse::<u32>().is_err()) {
                    return Err(ModelError::InvalidSink(format!("invalid trap oid: {}", oid)));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
