//! Ingested records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A structured document read from the bus, together with its arrival key
/// and the bus-provided timestamp when there is one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: Option<String>,
    pub value: Value,
    pub timestamp_ms: Option<i64>,
}

impl Record {
    pub fn new(value: Value) -> Self {
        Self {
            key: None,
            value,
            timestamp_ms: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    /// Look up a field by dotted path (`"request.duration"`).
    pub fn field(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.value, |node, segment| node.get(segment))
    }

    /// Field rendered as text. Strings are returned as-is, other scalars via
    /// their JSON representation, null or missing fields as `None`.
    pub fn field_text(&self, path: &str) -> Option<String> {
        match self.field(path)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Event time in milliseconds.
    ///
    /// The named field is tried first; it may hold an RFC 3339 string or
    /// epoch milliseconds. The bus timestamp is the fallback.
    pub fn event_time_ms(&self, field: Option<&str>) -> Option<i64> {
        field
            .and_then(|name| self.field(name))
            .and_then(parse_timestamp_value)
            .or(self.timestamp_ms)
    }
}

fn parse_timestamp_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc).timestamp_millis()),
        _ => None,
    }
}

/// An error record produced by an upstream pipeline on processing failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    /// ISO-8601 timestamp of the failure
    pub timestamp: String,

    /// Originating project, when the producer knew it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl ErrorData {
    pub fn new(timestamp: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            project: None,
            payload: Map::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.payload.insert(name.into(), value);
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_lookup() {
        let record = Record::new(json!({
            "project": "toto",
            "request": { "duration": 42 }
        }));

        assert_eq!(record.field("project"), Some(&json!("toto")));
        assert_eq!(record.field("request.duration"), Some(&json!(42)));
        assert_eq!(record.field("request.missing"), None);
        assert_eq!(record.field_text("request.duration").as_deref(), Some("42"));
        assert_eq!(record.field_text("project").as_deref(), Some("toto"));
    }

    #[test]
    fn test_event_time_resolution() {
        let record = Record::new(json!({ "ts": "2024-03-05T10:00:00Z" })).with_timestamp(7);
        assert_eq!(record.event_time_ms(Some("ts")), Some(1_709_632_800_000));
        assert_eq!(record.event_time_ms(Some("missing")), Some(7));
        assert_eq!(record.event_time_ms(None), Some(7));

        let numeric = Record::new(json!({ "ts": 1234 }));
        assert_eq!(numeric.event_time_ms(Some("ts")), Some(1234));

        let garbage = Record::new(json!({ "ts": "yesterday" }));
        assert_eq!(garbage.event_time_ms(Some("ts")), None);
    }

    #[test]
    fn test_error_data_flattens_payload() {
        let data: ErrorData = serde_json::from_value(json!({
            "timestamp": "2024-03-05T10:00:00Z",
            "errorReason": "INVALID_JSON",
            "message": "{oops"
        }))
        .unwrap();

        assert_eq!(data.project, None);
        assert_eq!(data.payload["errorReason"], "INVALID_JSON");

        let back = serde_json::to_value(&data).unwrap();
        assert_eq!(back["message"], "{oops");
        assert!(back.get("project").is_none());
    }
}
