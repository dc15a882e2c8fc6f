//! Index naming policy for the search-index store

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rollover policy for documents written to the search index.
///
/// A retention level is a pure function from a timestamp to an index
/// suffix; it never touches storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetentionLevel {
    Day,
    #[default]
    Week,
    Month,
    Quarter,
    Year,
}

impl RetentionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionLevel::Day => "day",
            RetentionLevel::Week => "week",
            RetentionLevel::Month => "month",
            RetentionLevel::Quarter => "quarter",
            RetentionLevel::Year => "year",
        }
    }

    /// Time bucket of `at` for this level
    pub fn suffix(&self, at: DateTime<Utc>) -> String {
        match self {
            RetentionLevel::Day => at.format("%Y-%m-%d").to_string(),
            RetentionLevel::Week => at.format("%G-w%V").to_string(),
            RetentionLevel::Month => at.format("%Y-%m").to_string(),
            RetentionLevel::Quarter => format!("{}-q{}", at.year(), at.month0() / 3 + 1),
            RetentionLevel::Year => at.format("%Y").to_string(),
        }
    }

    /// Full index name: `{project}-{logical}-{level}-{suffix}`, lowercased.
    ///
    /// The project comes from record data, so characters the store refuses in
    /// index names are replaced by `_` and an empty result becomes `no-project`.
    pub fn index_name(&self, project: &str, logical: &str, at: DateTime<Utc>) -> String {
        format!(
            "{}-{}-{}-{}",
            index_segment(project),
            logical.to_lowercase(),
            self.as_str(),
            self.suffix(at)
        )
    }
}

const FORBIDDEN_INDEX_CHARS: &[char] = &['\\', '/', '*', '?', '"', '<', '>', '|', ',', '#', ' ', ':'];

fn index_segment(project: &str) -> String {
    let cleaned: String = project
        .to_lowercase()
        .chars()
        .map(|c| {
            if FORBIDDEN_INDEX_CHARS.contains(&c) || c.is_whitespace() {
                '_'
            } else {
                c
            }
        })
        .collect();
    // names may not start with these
    let trimmed = cleaned.trim_start_matches(['-', '_', '+']);
    if trimmed.is_empty() {
        "no-project".to_string()
    } else {
        trimmed.to_string()
    }
}

impl fmt::Display for RetentionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetentionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "day" => Ok(RetentionLevel::Day),
            "week" => Ok(RetentionLevel::Week),
            "month" => Ok(RetentionLevel::Month),
            "quarter" => Ok(RetentionLevel::Quarter),
            "year" => Ok(RetentionLevel::Year),
            other => Err(format!("unknown retention level: {}", other)),
        }
    }
}
