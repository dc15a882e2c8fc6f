//! Composite grouping key

use serde::{Deserialize, Serialize};
use std::fmt;

/// Composite key a record is grouped and joined on.
///
/// A `Keys` value is made of the pipeline name, the aggregate-expression
/// descriptor and the partition dimension (usually the `project` field of
/// the record). Equality, ordering and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Keys {
    name: String,
    aggregation: String,
    project: String,
}

impl Keys {
    pub fn new(
        name: impl Into<String>,
        aggregation: impl Into<String>,
        project: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            aggregation: aggregation.into(),
            project: project.into(),
        }
    }

    /// Pipeline name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Aggregate-expression descriptor
    pub fn aggregation(&self) -> &str {
        &self.aggregation
    }

    /// Partition dimension
    pub fn project(&self) -> &str {
        &self.project
    }
}

impl fmt::Display for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.name, self.aggregation, self.project)
    }
}
