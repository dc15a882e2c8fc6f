//! In-memory staging area for bulk items

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Notify;

/// One document ready for the `_bulk` endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItem {
    /// Concrete index name, retention suffix included
    pub index: String,
    /// Serialized JSON document
    pub source: String,
    /// Submissions so far
    #[serde(default)]
    pub attempts: u32,
}

impl BulkItem {
    pub fn new(index: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            source: source.into(),
            attempts: 0,
        }
    }
}

/// Shared buffer between producers and the flush lane.
///
/// The lock is only held to push or to swap the whole vector out.
#[derive(Debug)]
pub struct EsBuffer {
    items: Mutex<Vec<BulkItem>>,
    max_items: usize,
    flush_interval: Duration,
    notify: Notify,
}

impl EsBuffer {
    pub fn new(max_items: usize, flush_interval: Duration) -> Self {
        Self {
            items: Mutex::new(Vec::with_capacity(max_items)),
            max_items: max_items.max(1),
            flush_interval,
            notify: Notify::new(),
        }
    }

    /// Append an item; wakes the flush lane once the buffer is full
    pub fn push(&self, item: BulkItem) {
        let full = {
            let mut items = self.items.lock();
            items.push(item);
            items.len() >= self.max_items
        };
        if full {
            self.notify.notify_one();
        }
    }

    /// Swap the staged items out, leaving an empty buffer
    pub fn take(&self) -> Vec<BulkItem> {
        std::mem::take(&mut *self.items.lock())
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Resolves once a push fills the buffer
    pub async fn full(&self) {
        self.notify.notified().await
    }
}
