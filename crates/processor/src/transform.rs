//! Record transformations applied before keying

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use metricflow_types::{Record, TransformationSpec};
use serde_json::Value;
use tracing::warn;

/// A rewrite of one record document.
///
/// Implementations leave `doc` untouched when they cannot apply and return
/// `false`.
pub trait Transformation: Send + Sync {
    fn apply(&self, process_id: &str, params: &TransformationSpec, doc: &mut Value, raw: &str) -> bool;
}

/// Reformats a date field from a source strftime format to a target format
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatDate;

impl Transformation for FormatDate {
    fn apply(&self, process_id: &str, params: &TransformationSpec, doc: &mut Value, raw: &str) -> bool {
        let TransformationSpec::FormatDate {
            field,
            source_format,
            target_format,
        } = params;

        let Some(current) = doc.get(field.as_str()).and_then(Value::as_str) else {
            return false;
        };
        if current.trim().is_empty() {
            return false;
        }

        match reformat(current, source_format, target_format) {
            Some(formatted) => {
                doc[field.as_str()] = Value::String(formatted);
                true
            }
            None => {
                warn!(process = process_id, field = %field, value = raw, "Couldn't reformat date field");
                false
            }
        }
    }
}

fn reformat(value: &str, source: &str, target: &str) -> Option<String> {
    if StrftimeItems::new(target).any(|item| matches!(item, Item::Error)) {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_str(value, source) {
        return Some(parsed.format(target).to_string());
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, source) {
        return Some(parsed.format(target).to_string());
    }
    let date = NaiveDate::parse_from_str(value, source).ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.format(target).to_string())
}

/// Apply the pipeline's transformations to a record in order
pub fn apply_all(process_id: &str, specs: &[TransformationSpec], record: &mut Record) {
    if specs.is_empty() {
        return;
    }
    let raw = record.value.to_string();
    for spec in specs {
        let transformation: &dyn Transformation = match spec {
            TransformationSpec::FormatDate { .. } => &FormatDate,
        };
        transformation.apply(process_id, spec, &mut record.value, &raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(source: &str, target: &str) -> TransformationSpec {
        TransformationSpec::FormatDate {
            field: "date".into(),
            source_format: source.into(),
            target_format: target.into(),
        }
    }

    #[test]
    fn test_reformats_datetime() {
        let mut doc = json!({ "date": "05/03/2024 10:15:00" });
        let raw = doc.to_string();
        assert!(FormatDate.apply("p", &spec("%d/%m/%Y %H:%M:%S", "%Y-%m-%dT%H:%M:%S"), &mut doc, &raw));
        assert_eq!(doc["date"], "2024-03-05T10:15:00");
    }

    #[test]
    fn test_reformats_date_only() {
        let mut doc = json!({ "date": "2024-03-05" });
        let raw = doc.to_string();
        assert!(FormatDate.apply("p", &spec("%Y-%m-%d", "%d.%m.%Y %H:%M"), &mut doc, &raw));
        assert_eq!(doc["date"], "05.03.2024 00:00");
    }

    #[test]
    fn test_unparsable_leaves_document() {
        let mut doc = json!({ "date": "not a date", "other": 1 });
        let before = doc.clone();
        let raw = doc.to_string();
        assert!(!FormatDate.apply("p", &spec("%Y-%m-%d", "%Y"), &mut doc, &raw));
        assert_eq!(doc, before);
    }

    #[test]
    fn test_invalid_target_format_leaves_document() {
        let mut doc = json!({ "date": "2024-03-05" });
        let raw = doc.to_string();
        assert!(!FormatDate.apply("p", &spec("%Y-%m-%d", "%Q"), &mut doc, &raw));
        assert_eq!(doc["date"], "2024-03-05");
    }

    #[test]
    fn test_missing_or_blank_field() {
        let mut doc = json!({ "date": "  " });
        let raw = doc.to_string();
        assert!(!FormatDate.apply("p", &spec("%Y", "%Y"), &mut doc, &raw));
        let mut doc = json!({});
        assert!(!FormatDate.apply("p", &spec("%Y", "%Y"), &mut doc, "{}"));
    }

    #[test]
    fn test_apply_all_on_record() {
        let mut record = Record::new(json!({ "date": "2024-03-05", "project": "toto" }));
        apply_all("p", &[spec("%Y-%m-%d", "%Y/%m/%d")], &mut record);
        assert_eq!(record.value["date"], "2024/03/05");
    }
}
