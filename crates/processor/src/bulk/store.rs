//! Search-index store client
//!
//! [`HttpIndexStore`] speaks the Elasticsearch `_bulk` protocol: an NDJSON
//! body of action/source line pairs, answered by one result per item.

use super::buffer::BulkItem;
use crate::error::{BulkError, BulkResult};
use async_trait::async_trait;
use metricflow_config::SearchIndexConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::Write as _;
use tracing::{debug, warn};

/// Store exception type the store raises when its write queue is full
pub const REJECTED_EXECUTION: &str = "es_rejected_execution_exception";

/// Per-item error as reported by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Result of one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    #[serde(rename = "_index", default)]
    pub index: Option<String>,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

impl ItemResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }
}

/// Items are keyed by their action name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemResponse {
    #[serde(alias = "create", alias = "update", alias = "delete")]
    pub index: ItemResult,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub took: u64,
    #[serde(default)]
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<BulkItemResponse>,
}

impl BulkResponse {
    /// All-success response for `count` items
    pub fn success(count: usize) -> Self {
        Self {
            took: 0,
            errors: false,
            items: (0..count)
                .map(|_| BulkItemResponse {
                    index: ItemResult {
                        index: None,
                        status: 201,
                        error: None,
                    },
                })
                .collect(),
        }
    }
}

/// Bulk write seam
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn bulk(&self, items: &[BulkItem]) -> BulkResult<BulkResponse>;
}

/// Build the NDJSON `_bulk` body
pub fn bulk_body(items: &[BulkItem]) -> String {
    let mut body = String::new();
    for item in items {
        let action = json!({ "index": { "_index": item.index } });
        let _ = writeln!(body, "{}", action);
        let _ = writeln!(body, "{}", item.source);
    }
    body
}

/// reqwest-backed `_bulk` client
#[derive(Debug, Clone)]
pub struct HttpIndexStore {
    client: reqwest::Client,
    endpoint: String,
    username: Option<String>,
    password: Option<String>,
}

impl HttpIndexStore {
    pub fn new(config: &SearchIndexConfig) -> BulkResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BulkError::Client(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/_bulk", config.url.trim_end_matches('/')),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl IndexStore for HttpIndexStore {
    async fn bulk(&self, items: &[BulkItem]) -> BulkResult<BulkResponse> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(bulk_body(items));
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_ref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| BulkError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "bulk request rejected");
            return Err(BulkError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: BulkResponse = response
            .json()
            .await
            .map_err(|e| BulkError::Decode(e.to_string()))?;
        debug!(items = items.len(), took = parsed.took, errors = parsed.errors, "bulk request done");
        Ok(parsed)
    }
}
