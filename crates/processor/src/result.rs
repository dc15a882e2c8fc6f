//! Aggregation outputs

use crate::window::WindowBounds;
use chrono::{DateTime, SecondsFormat, Utc};
use metricflow_types::Keys;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One closed window's aggregate for one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowedResult {
    pub keys: Keys,
    pub window: WindowBounds,
    pub value: f64,
}

/// A windowed result ready for routing, optionally carrying the
/// secondary-stream record it was joined with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub keys: Keys,
    pub window: WindowBounds,
    pub value: f64,
    /// Result time; the end of the window
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<Value>,
}

impl MetricResult {
    /// Attach a secondary payload
    pub fn with_element(mut self, element: Value) -> Self {
        self.element = Some(element);
        self
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// Flat document used by the search-index sink and the templates
    pub fn to_document(&self) -> Value {
        let mut doc = json!({
            "name": self.keys.name(),
            "aggregation": self.keys.aggregation(),
            "project": self.keys.project(),
            "value": self.value,
            "window_start": self.window.start.to_rfc3339_opts(SecondsFormat::Millis, true),
            "window_end": self.window.end.to_rfc3339_opts(SecondsFormat::Millis, true),
            "@timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        if let (Some(element), Some(map)) = (&self.element, doc.as_object_mut()) {
            map.insert("element".to_string(), element.clone());
        }
        doc
    }
}

impl From<WindowedResult> for MetricResult {
    fn from(result: WindowedResult) -> Self {
        Self {
            timestamp: result.window.end,
            keys: result.keys,
            window: result.window,
            value: result.value,
            element: None,
        }
    }
}
