//! Keying and filtering rules
//!
//! [`MetricRules`] is the per-pipeline hook set evaluated around the
//! aggregation stage: `filter_key` and `filter` drop records before
//! grouping, `select_key` derives the grouping key, `map_value` extracts
//! the scalar fed to the aggregate function, and `having` filters results
//! after window close. The `*_join` variants apply the same steps to the
//! secondary stream of a join.
//!
//! [`FieldRules`] implements the hooks from a [`ProcessDefinition`].

use metricflow_types::{
    FieldPredicate, HavingSpec, JoinSpec, Keys, PredicateOp, ProcessDefinition, Record,
    ValuePolicy,
};
use serde_json::Value;

/// Hooks defining how a pipeline keys, filters and measures records
pub trait MetricRules: Send + Sync {
    /// Pipeline name
    fn name(&self) -> &str;

    /// Grouping key; must be deterministic for a given record
    fn select_key(&self, record: &Record) -> Keys;

    /// First pre-aggregation predicate, usually on the arrival key
    fn filter_key(&self, _record: &Record) -> bool {
        true
    }

    /// Second pre-aggregation predicate, on the document
    fn filter(&self, _record: &Record) -> bool {
        true
    }

    /// Scalar fed to the aggregate function.
    ///
    /// `None` means the record has no usable value and the pipeline's
    /// policy is to drop it.
    fn map_value(&self, record: &Record) -> Option<f64>;

    /// Event time of a primary record in epoch millis
    fn event_time(&self, record: &Record) -> Option<i64> {
        record.event_time_ms(None)
    }

    /// Post-aggregation predicate; an error counts as a rejection
    fn having(&self, _keys: &Keys, _value: f64) -> anyhow::Result<bool> {
        Ok(true)
    }

    /// Key of a secondary-stream record
    fn select_key_join(&self, record: &Record) -> Keys {
        self.select_key(record)
    }

    fn filter_key_join(&self, _record: &Record) -> bool {
        true
    }

    fn filter_join(&self, _record: &Record) -> bool {
        true
    }

    /// Event time of a secondary record in epoch millis
    fn join_event_time(&self, record: &Record) -> Option<i64> {
        record.event_time_ms(None)
    }
}

/// Rules driven by a process definition's fields
#[derive(Debug, Clone)]
pub struct FieldRules {
    name: String,
    descriptor: String,
    partition_field: String,
    value_field: Option<String>,
    value_policy: ValuePolicy,
    timestamp_field: Option<String>,
    key_prefix: Option<String>,
    filters: Vec<FieldPredicate>,
    having: Option<HavingSpec>,
    join: Option<JoinSpec>,
}

impl FieldRules {
    pub fn from_definition(definition: &ProcessDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            descriptor: definition.aggregation.descriptor(),
            partition_field: definition.partition_field.clone(),
            value_field: definition.aggregation.field.clone(),
            value_policy: definition.value_policy,
            timestamp_field: definition.timestamp_field.clone(),
            key_prefix: definition.key_prefix.clone(),
            filters: definition.filters.clone(),
            having: definition.having,
            join: definition.join.clone(),
        }
    }

    fn keys_for(&self, record: &Record, partition_field: &str) -> Keys {
        let project = record.field_text(partition_field).unwrap_or_default();
        Keys::new(&self.name, &self.descriptor, project)
    }
}

impl MetricRules for FieldRules {
    fn name(&self) -> &str {
        &self.name
    }

    fn select_key(&self, record: &Record) -> Keys {
        self.keys_for(record, &self.partition_field)
    }

    fn filter_key(&self, record: &Record) -> bool {
        key_has_prefix(record, self.key_prefix.as_deref())
    }

    fn filter(&self, record: &Record) -> bool {
        self.filters.iter().all(|p| matches(p, record))
    }

    fn map_value(&self, record: &Record) -> Option<f64> {
        let Some(field) = &self.value_field else {
            // count(*) style expressions: every record weighs one
            return Some(1.0);
        };
        match record.field(field).and_then(numeric) {
            Some(value) => Some(value),
            None => match self.value_policy {
                ValuePolicy::Sentinel(sentinel) => Some(sentinel),
                ValuePolicy::Drop => None,
            },
        }
    }

    fn event_time(&self, record: &Record) -> Option<i64> {
        record.event_time_ms(self.timestamp_field.as_deref())
    }

    fn having(&self, _keys: &Keys, value: f64) -> anyhow::Result<bool> {
        match &self.having {
            Some(having) => Ok(having.evaluate(value)?),
            None => Ok(true),
        }
    }

    fn select_key_join(&self, record: &Record) -> Keys {
        match &self.join {
            Some(join) => self.keys_for(record, &join.partition_field),
            None => self.select_key(record),
        }
    }

    fn filter_key_join(&self, record: &Record) -> bool {
        match &self.join {
            Some(join) => key_has_prefix(record, join.key_prefix.as_deref()),
            None => true,
        }
    }

    fn filter_join(&self, record: &Record) -> bool {
        match &self.join {
            Some(join) => join.filters.iter().all(|p| matches(p, record)),
            None => true,
        }
    }

    fn join_event_time(&self, record: &Record) -> Option<i64> {
        let field = self.join.as_ref().and_then(|j| j.timestamp_field.as_deref());
        record.event_time_ms(field)
    }
}

fn key_has_prefix(record: &Record, prefix: Option<&str>) -> bool {
    match prefix {
        None => true,
        Some(prefix) => record
            .key
            .as_deref()
            .is_some_and(|key| key.starts_with(prefix)),
    }
}

/// Numeric reading of a JSON value; numeric strings are parsed and
/// booleans count as 0 or 1.
pub fn numeric(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

/// Evaluate a field predicate against a record
pub fn matches(predicate: &FieldPredicate, record: &Record) -> bool {
    let field = record.field(&predicate.field).filter(|v| !v.is_null());
    match predicate.op {
        PredicateOp::Exists => field.is_some(),
        PredicateOp::Eq => field.is_some_and(|v| loosely_equal(v, &predicate.value)),
        PredicateOp::Ne => !field.is_some_and(|v| loosely_equal(v, &predicate.value)),
        PredicateOp::Gt => compare(field, &predicate.value, |a, b| a > b),
        PredicateOp::Lt => compare(field, &predicate.value, |a, b| a < b),
        PredicateOp::Contains => match (field, &predicate.value) {
            (Some(Value::String(haystack)), Value::String(needle)) => haystack.contains(needle),
            (Some(Value::Array(items)), needle) => {
                items.iter().any(|item| loosely_equal(item, needle))
            }
            _ => false,
        },
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    match (numeric(left), numeric(right)) {
        (Some(a), Some(b)) => a == b,
        _ => text(left) == text(right),
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compare(field: Option<&Value>, threshold: &Value, op: fn(f64, f64) -> bool) -> bool {
    match (field.and_then(numeric), numeric(threshold)) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}
