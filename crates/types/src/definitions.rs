//! Pipeline definitions
//!
//! A [`ProcessDefinition`] describes one aggregation pipeline: where its
//! records come from, how they are keyed and windowed, which aggregate
//! function folds them, and where the results go. Definitions are loaded
//! once at startup and never change while the engine runs.

use crate::errors::{ModelError, Result};
use crate::sinks::SinkDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Default join window, one minute
pub const DEFAULT_JOIN_WINDOW_MS: u64 = 60_000;

/// Default partition dimension
pub const DEFAULT_PARTITION_FIELD: &str = "project";

/// Configuration of one aggregation pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    pub name: String,

    pub aggregation: AggregationSpec,

    /// Primary source topic
    pub source_topic: String,

    pub window: WindowSpec,

    /// Allowed event-time lateness before windows close
    #[serde(default)]
    pub allowed_lateness_ms: u64,

    /// Field holding the event time; the bus timestamp is used otherwise
    #[serde(default)]
    pub timestamp_field: Option<String>,

    #[serde(default = "default_partition_field")]
    pub partition_field: String,

    /// Only records whose arrival key starts with this prefix are kept
    #[serde(default)]
    pub key_prefix: Option<String>,

    #[serde(default)]
    pub filters: Vec<FieldPredicate>,

    #[serde(default)]
    pub value_policy: ValuePolicy,

    #[serde(default)]
    pub having: Option<HavingSpec>,

    #[serde(default)]
    pub join: Option<JoinSpec>,

    #[serde(default)]
    pub sinks: Vec<SinkDescriptor>,

    /// Rewrites applied to each record before keying
    #[serde(default)]
    pub transformations: Vec<TransformationSpec>,
}

/// A record rewrite step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformationSpec {
    /// Reformat a date field from one strftime format to another
    FormatDate {
        field: String,
        source_format: String,
        target_format: String,
    },
}

fn default_partition_field() -> String {
    DEFAULT_PARTITION_FIELD.to_string()
}

impl ProcessDefinition {
    /// Minimal definition with defaults for every optional section
    pub fn new(
        name: impl Into<String>,
        aggregation: AggregationSpec,
        source_topic: impl Into<String>,
        window: WindowSpec,
    ) -> Self {
        Self {
            name: name.into(),
            aggregation,
            source_topic: source_topic.into(),
            window,
            allowed_lateness_ms: 0,
            timestamp_field: None,
            partition_field: default_partition_field(),
            key_prefix: None,
            filters: Vec::new(),
            value_policy: ValuePolicy::default(),
            having: None,
            join: None,
            sinks: Vec::new(),
            transformations: Vec::new(),
        }
    }

    pub fn with_transformation(mut self, transformation: TransformationSpec) -> Self {
        self.transformations.push(transformation);
        self
    }

    pub fn with_sink(mut self, sink: SinkDescriptor) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_join(mut self, join: JoinSpec) -> Self {
        self.join = Some(join);
        self
    }

    pub fn with_having(mut self, having: HavingSpec) -> Self {
        self.having = Some(having);
        self
    }

    pub fn with_filter(mut self, filter: FieldPredicate) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ModelError::definition("<unnamed>", "name is empty"));
        }
        if self.source_topic.trim().is_empty() {
            return Err(ModelError::definition(&self.name, "source topic is empty"));
        }
        if self.aggregation.function.trim().is_empty() {
            return Err(ModelError::definition(&self.name, "aggregate function is empty"));
        }
        self.window
            .validate()
            .map_err(|e| ModelError::definition(&self.name, e.to_string()))?;

        if let Some(join) = &self.join {
            if join.topic.trim().is_empty() {
                return Err(ModelError::definition(&self.name, "join topic is empty"));
            }
            if join.window_ms == 0 {
                return Err(ModelError::definition(&self.name, "join window must be positive"));
            }
        }
        if let Some(having) = &self.having {
            if !having.threshold.is_finite() {
                return Err(ModelError::definition(&self.name, "having threshold is not finite"));
            }
        }
        for sink in &self.sinks {
            sink.validate()
                .map_err(|e| ModelError::definition(&self.name, e.to_string()))?;
        }
        Ok(())
    }
}

/// The aggregate expression: a registered function applied to a field.
///
/// Treated as an opaque, pre-resolved descriptor; [`AggregationSpec::descriptor`]
/// is what ends up in the grouping key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSpec {
    pub function: String,
    #[serde(default)]
    pub field: Option<String>,
}

impl AggregationSpec {
    pub fn new(function: impl Into<String>, field: Option<&str>) -> Self {
        Self {
            function: function.into(),
            field: field.map(str::to_string),
        }
    }

    pub fn descriptor(&self) -> String {
        match &self.field {
            Some(field) => format!("{}({})", self.function, field),
            None => format!("{}(*)", self.function),
        }
    }
}

impl fmt::Display for AggregationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}

/// Windowing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WindowSpec {
    /// Fixed-size windows starting every `advance_ms`; may overlap
    Hopping { size_ms: u64, advance_ms: u64 },
    /// Fixed-size, contiguous, non-overlapping windows
    Tumbling { size_ms: u64 },
    /// Windows closed by `gap_ms` of key inactivity
    Session { gap_ms: u64 },
}

impl WindowSpec {
    pub fn hopping(size: Duration, advance: Duration) -> Self {
        WindowSpec::Hopping {
            size_ms: size.as_millis() as u64,
            advance_ms: advance.as_millis() as u64,
        }
    }

    pub fn tumbling(size: Duration) -> Self {
        WindowSpec::Tumbling {
            size_ms: size.as_millis() as u64,
        }
    }

    pub fn session(gap: Duration) -> Self {
        WindowSpec::Session {
            gap_ms: gap.as_millis() as u64,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            WindowSpec::Hopping { size_ms, advance_ms } => {
                if size_ms == 0 || advance_ms == 0 {
                    return Err(ModelError::InvalidWindow(
                        "hopping size and advance must be positive".to_string(),
                    ));
                }
                if advance_ms > size_ms {
                    return Err(ModelError::InvalidWindow(format!(
                        "hopping advance {}ms exceeds size {}ms",
                        advance_ms, size_ms
                    )));
                }
                Ok(())
            }
            WindowSpec::Tumbling { size_ms } if size_ms == 0 => Err(ModelError::InvalidWindow(
                "tumbling size must be positive".to_string(),
            )),
            WindowSpec::Session { gap_ms } if gap_ms == 0 => Err(ModelError::InvalidWindow(
                "session gap must be positive".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// How unmatched primary results are treated by the join stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    /// Drop results without a secondary match
    #[default]
    Inner,
    /// Emit results without a secondary match with no attached payload
    Left,
}

/// Second-stream correlation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSpec {
    pub topic: String,

    #[serde(default = "default_join_window")]
    pub window_ms: u64,

    #[serde(default)]
    pub mode: JoinMode,

    #[serde(default = "default_partition_field")]
    pub partition_field: String,

    #[serde(default)]
    pub key_prefix: Option<String>,

    #[serde(default)]
    pub filters: Vec<FieldPredicate>,

    #[serde(default)]
    pub timestamp_field: Option<String>,
}

fn default_join_window() -> u64 {
    DEFAULT_JOIN_WINDOW_MS
}

impl JoinSpec {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            window_ms: DEFAULT_JOIN_WINDOW_MS,
            mode: JoinMode::default(),
            partition_field: default_partition_field(),
            key_prefix: None,
            filters: Vec::new(),
            timestamp_field: None,
        }
    }

    pub fn with_mode(mut self, mode: JoinMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Comparison operators shared by having and field predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl Comparison {
    pub fn compare(&self, left: f64, right: f64) -> bool {
        match self {
            Comparison::Gt => left > right,
            Comparison::Ge => left >= right,
            Comparison::Lt => left < right,
            Comparison::Le => left <= right,
            Comparison::Eq => left == right,
            Comparison::Ne => left != right,
        }
    }
}

/// Post-aggregation predicate `value <op> threshold`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HavingSpec {
    pub op: Comparison,
    pub threshold: f64,
}

impl HavingSpec {
    pub fn new(op: Comparison, threshold: f64) -> Self {
        Self { op, threshold }
    }

    pub fn evaluate(&self, value: f64) -> Result<bool> {
        if value.is_nan() {
            return Err(ModelError::Predicate("aggregate value is NaN".to_string()));
        }
        Ok(self.op.compare(value, self.threshold))
    }
}

/// Pre-aggregation predicate over one record field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPredicate {
    pub field: String,
    pub op: PredicateOp,
    #[serde(default)]
    pub value: Value,
}

impl FieldPredicate {
    pub fn new(field: impl Into<String>, op: PredicateOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOp {
    Eq,
    Ne,
    Exists,
    Gt,
    Lt,
    Contains,
}

/// What to do when the aggregated field is missing or not numeric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValuePolicy {
    /// Substitute this value
    Sentinel(f64),
    /// Drop the record
    Drop,
}

impl Default for ValuePolicy {
    fn default() -> Self {
        ValuePolicy::Sentinel(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition() -> ProcessDefinition {
        ProcessDefinition::new(
            "latency",
            AggregationSpec::new("avg", Some("duration")),
            "logs",
            WindowSpec::tumbling(Duration::from_secs(60)),
        )
    }

    #[test]
    fn test_descriptor() {
        assert_eq!(AggregationSpec::new("sum", Some("value")).descriptor(), "sum(value)");
        assert_eq!(AggregationSpec::new("count", None).descriptor(), "count(*)");
    }

    #[test]
    fn test_window_validation() {
        assert!(WindowSpec::Hopping { size_ms: 60_000, advance_ms: 10_000 }.validate().is_ok());
        assert!(WindowSpec::Hopping { size_ms: 60_000, advance_ms: 60_000 }.validate().is_ok());
        assert!(WindowSpec::Hopping { size_ms: 10_000, advance_ms: 60_000 }.validate().is_err());
        assert!(WindowSpec::Tumbling { size_ms: 0 }.validate().is_err());
        assert!(WindowSpec::Session { gap_ms: 0 }.validate().is_err());
    }

    #[test]
    fn test_definition_validation() {
        assert!(definition().validate().is_ok());

        let mut bad = definition();
        bad.source_topic = String::new();
        assert!(bad.validate().is_err());

        let mut bad_join = definition();
        bad_join.join = Some(JoinSpec {
            window_ms: 0,
            ..JoinSpec::new("other")
        });
        assert!(bad_join.validate().is_err());

        let bad_sink = definition().with_sink(SinkDescriptor::Bus { topic: String::new() });
        let err = bad_sink.validate().unwrap_err();
        assert!(err.to_string().contains("latency"));
    }

    #[test]
    fn test_definition_from_json_defaults() {
        let def: ProcessDefinition = serde_json::from_value(json!({
            "name": "errors-per-project",
            "aggregation": { "function": "count" },
            "source_topic": "logs",
            "window": { "type": "hopping", "size_ms": 60000, "advance_ms": 30000 },
            "join": { "topic": "deployments" },
            "value_policy": "drop"
        }))
        .unwrap();

        assert_eq!(def.partition_field, "project");
        assert_eq!(def.value_policy, ValuePolicy::Drop);
        let join = def.join.unwrap();
        assert_eq!(join.window_ms, DEFAULT_JOIN_WINDOW_MS);
        assert_eq!(join.mode, JoinMode::Inner);
        assert!(def.sinks.is_empty());
    }

    #[test]
    fn test_having() {
        let having = HavingSpec::new(Comparison::Gt, 10.0);
        assert!(having.evaluate(11.0).unwrap());
        assert!(!having.evaluate(10.0).unwrap());
        assert!(having.evaluate(f64::NAN).is_err());
    }
}
