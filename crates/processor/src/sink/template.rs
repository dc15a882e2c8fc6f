//! `{{placeholder}}` rendering for notification sinks

use crate::result::MetricResult;
use chrono::SecondsFormat;

/// Placeholders understood by [`render`]
pub const PLACEHOLDERS: [&str; 7] = ["name", "aggregation", "project", "value", "start", "end", "element"];

/// Substitute the result's fields into `template`.
///
/// Unknown placeholders are left as they are. `element` renders as compact
/// JSON, or as an empty string when nothing was joined.
pub fn render(template: &str, result: &MetricResult) -> String {
    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };
        let name = after[..close].trim();
        match lookup(name, result) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    out
}

fn lookup(name: &str, result: &MetricResult) -> Option<String> {
    let value = match name {
        "name" => result.keys.name().to_string(),
        "aggregation" => result.keys.aggregation().to_string(),
        "project" => result.keys.project().to_string(),
        "value" => result.value.to_string(),
        "start" => result.window.start.to_rfc3339_opts(SecondsFormat::Millis, true),
        "end" => result.window.end.to_rfc3339_opts(SecondsFormat::Millis, true),
        "element" => result
            .element
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_default(),
        _ => return None,
    };
    Some(value)
}
