//! Label sets for the processor counters

use prometheus_client::encoding::EncodeLabelSet;

/// Common label names used across metrics
pub struct LabelNames;

impl LabelNames {
    pub const PIPELINE: &'static str = "pipeline";
    pub const OUTCOME: &'static str = "outcome";
    pub const REASON: &'static str = "reason";
    pub const SINK: &'static str = "sink";
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PipelineLabels {
    pub pipeline: String,
}

impl PipelineLabels {
    pub fn new(pipeline: &str) -> Self {
        Self {
            pipeline: pipeline.to_string(),
        }
    }
}

/// Per-record outcome of the aggregation stage.
///
/// `reason` is empty unless the outcome is `dropped`.
#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub pipeline: String,
    pub outcome: String,
    pub reason: String,
}

impl OutcomeLabels {
    pub fn new(pipeline: &str, outcome: &str, reason: &str) -> Self {
        Self {
            pipeline: pipeline.to_string(),
            outcome: outcome.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SinkLabels {
    pub pipeline: String,
    pub sink: String,
}

impl SinkLabels {
    pub fn new(pipeline: &str, sink: &str) -> Self {
        Self {
            pipeline: pipeline.to_string(),
            sink: sink.to_string(),
        }
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReasonLabels {
    pub reason: String,
}

impl ReasonLabels {
    pub fn new(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_equality() {
        assert_eq!(PipelineLabels::new("a"), PipelineLabels::new("a"));
        assert_ne!(SinkLabels::new("a", "bus"), SinkLabels::new("a", "chat"));
        assert_eq!(OutcomeLabels::new("a", "dropped", "late").reason, "late");
    }
}
