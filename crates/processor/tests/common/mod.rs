//! In-memory transports shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use processor::bulk::{BulkItem, BulkItemResponse, BulkResponse, ItemError, ItemResult};
use processor::error::{BulkError, BulkResult};
use processor::sink::ChatClient;
use processor::{BusPublisher, IndexStore, ProcessorMetrics};
use prometheus_client::registry::Registry;
use serde_json::Value;
use std::time::Duration;

pub fn metrics() -> ProcessorMetrics {
    ProcessorMetrics::new(&mut Registry::default())
}

/// Records every published message
#[derive(Default)]
pub struct MemoryBus {
    pub published: Mutex<Vec<(String, String, Value)>>,
}

#[async_trait]
impl BusPublisher for MemoryBus {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> anyhow::Result<()> {
        self.published
            .lock()
            .push((topic.to_string(), key.to_string(), serde_json::from_slice(payload)?));
        Ok(())
    }
}

/// A chat webhook that takes `delay` to answer each post
pub struct SlowChat {
    pub delay: Duration,
    pub posted: Mutex<Vec<String>>,
}

impl SlowChat {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            posted: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatClient for SlowChat {
    async fn post(&self, _webhook_url: &str, text: &str) -> anyhow::Result<()> {
        tokio::time::sleep(self.delay).await;
        self.posted.lock().push(text.to_string());
        Ok(())
    }
}

/// Accepts every item
#[derive(Default)]
pub struct MemoryStore {
    pub items: Mutex<Vec<BulkItem>>,
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn bulk(&self, items: &[BulkItem]) -> BulkResult<BulkResponse> {
        self.items.lock().extend_from_slice(items);
        Ok(BulkResponse::success(items.len()))
    }
}

/// Answers every request with a 500 for the whole batch
#[derive(Default)]
pub struct DownStore {
    pub requests: Mutex<usize>,
}

#[async_trait]
impl IndexStore for DownStore {
    async fn bulk(&self, _items: &[BulkItem]) -> BulkResult<BulkResponse> {
        *self.requests.lock() += 1;
        Err(BulkError::Status {
            status: 500,
            body: "cluster unavailable".to_string(),
        })
    }
}

/// Rejects the items whose source contains `marker` with a mapping error
pub struct RejectingStore {
    pub marker: String,
    pub accepted: Mutex<Vec<BulkItem>>,
}

impl RejectingStore {
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.to_string(),
            accepted: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl IndexStore for RejectingStore {
    async fn bulk(&self, items: &[BulkItem]) -> BulkResult<BulkResponse> {
        let results = items
            .iter()
            .map(|item| {
                if item.source.contains(&self.marker) {
                    rejected(400, "mapper_parsing_exception", "failed to parse field [value]")
                } else {
                    self.accepted.lock().push(item.clone());
                    accepted()
                }
            })
            .collect::<Vec<_>>();
        Ok(BulkResponse {
            took: 1,
            errors: results.iter().any(|r| !r.index.is_success()),
            items: results,
        })
    }
}

pub fn accepted() -> BulkItemResponse {
    BulkItemResponse {
        index: ItemResult {
            index: None,
            status: 201,
            error: None,
        },
    }
}

pub fn rejected(status: u16, kind: &str, reason: &str) -> BulkItemResponse {
    BulkItemResponse {
        index: ItemResult {
            index: None,
            status,
            error: Some(ItemError {
                kind: kind.to_string(),
                reason: Some(reason.to_string()),
            }),
        },
    }
}
