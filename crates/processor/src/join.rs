//! Stream-table style join of window results with a secondary stream
//!
//! Closed window results are correlated with records of the join topic
//! that carry the same [`Keys`] and whose event time lies within the join
//! window of the result timestamp, in either direction. A match emits the
//! result with the secondary record attached as `element`, once per
//! matching record.
//!
//! Both sides are buffered until the join watermark (the highest time seen
//! on either side) passes their own time plus the join window. At that
//! point an unmatched result is discarded in [`JoinMode::Inner`] or emitted
//! without an element in [`JoinMode::Left`].
//!
//! Topics are expected to be co-partitioned: a worker only ever sees the
//! join records of its own partition.

use crate::result::MetricResult;
use crate::rules::MetricRules;
use crate::watermark::{BoundedOutOfOrdernessWatermark, WatermarkGenerator};
use metricflow_types::{JoinMode, JoinSpec, Keys, Record};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug)]
struct PendingResult {
    result: MetricResult,
    matched: bool,
}

#[derive(Debug, Clone)]
struct BufferedRecord {
    event_time: i64,
    value: Value,
}

/// Why a secondary record did not enter the join buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondaryOutcome {
    Filtered,
    MissingTimestamp,
    Late,
    Buffered,
}

/// Join buffers of one partition
pub struct JoinStage {
    rules: Arc<dyn MetricRules>,
    mode: JoinMode,
    window_ms: i64,
    watermark: BoundedOutOfOrdernessWatermark,
    results: HashMap<Keys, Vec<PendingResult>>,
    secondaries: HashMap<Keys, Vec<BufferedRecord>>,
}

impl JoinStage {
    pub fn new(rules: Arc<dyn MetricRules>, spec: &JoinSpec) -> Self {
        Self {
            rules,
            mode: spec.mode,
            window_ms: i64::try_from(spec.window_ms).unwrap_or(i64::MAX),
            watermark: BoundedOutOfOrdernessWatermark::new(Duration::ZERO),
            results: HashMap::new(),
            secondaries: HashMap::new(),
        }
    }

    pub fn mode(&self) -> JoinMode {
        self.mode
    }

    fn within(&self, left: i64, right: i64) -> bool {
        left.abs_diff(right) <= self.window_ms.unsigned_abs()
    }

    /// Offer a closed window result.
    ///
    /// Returns the joined results that became available, including results
    /// released by eviction in left mode.
    pub fn push_result(&mut self, result: MetricResult) -> Vec<MetricResult> {
        let timestamp = result.timestamp_millis();
        let mut emitted = Vec::new();

        if let Some(records) = self.secondaries.get(&result.keys) {
            for record in records.iter().filter(|r| self.within(r.event_time, timestamp)) {
                emitted.push(result.clone().with_element(record.value.clone()));
            }
        }
        trace!(key = %result.keys, matches = emitted.len(), "buffering window result for join");

        let matched = !emitted.is_empty();
        self.results
            .entry(result.keys.clone())
            .or_default()
            .push(PendingResult { result, matched });

        self.advance(timestamp, &mut emitted);
        emitted
    }

    /// Offer a record of the join topic.
    pub fn push_secondary(&mut self, record: &Record) -> (SecondaryOutcome, Vec<MetricResult>) {
        let mut emitted = Vec::new();

        if !self.rules.filter_key_join(record) || !self.rules.filter_join(record) {
            return (SecondaryOutcome::Filtered, emitted);
        }
        let keys = self.rules.select_key_join(record);
        let Some(event_time) = self.rules.join_event_time(record) else {
            debug!(pipeline = self.rules.name(), key = %keys, "dropping join record without event time");
            return (SecondaryOutcome::MissingTimestamp, emitted);
        };
        if event_time.saturating_add(self.window_ms) < self.watermark.current_watermark().timestamp {
            debug!(pipeline = self.rules.name(), key = %keys, event_time, "dropping late join record");
            return (SecondaryOutcome::Late, emitted);
        }

        if let Some(pending) = self.results.get_mut(&keys) {
            for entry in pending.iter_mut() {
                if entry.result.timestamp_millis().abs_diff(event_time) <= self.window_ms.unsigned_abs() {
                    entry.matched = true;
                    emitted.push(entry.result.clone().with_element(record.value.clone()));
                }
            }
        }

        self.secondaries.entry(keys).or_default().push(BufferedRecord {
            event_time,
            value: record.value.clone(),
        });

        self.advance(event_time, &mut emitted);
        (SecondaryOutcome::Buffered, emitted)
    }

    /// Release everything still buffered. Left mode emits the unmatched
    /// results without an element.
    pub fn flush_all(&mut self) -> Vec<MetricResult> {
        self.secondaries.clear();
        let mut emitted = Vec::new();
        for (_, pending) in self.results.drain() {
            for entry in pending {
                if !entry.matched && self.mode == JoinMode::Left {
                    emitted.push(entry.result);
                }
            }
        }
        emitted.sort_by_key(|r| r.timestamp_millis());
        emitted
    }

    /// Number of buffered results and secondary records
    pub fn buffered(&self) -> (usize, usize) {
        (
            self.results.values().map(Vec::len).sum(),
            self.secondaries.values().map(Vec::len).sum(),
        )
    }

    fn advance(&mut self, time: i64, emitted: &mut Vec<MetricResult>) {
        let Some(watermark) = self.watermark.on_event(time) else {
            return;
        };
        let horizon = watermark.timestamp.saturating_sub(self.window_ms);

        let mode = self.mode;
        self.results.retain(|keys, pending| {
            pending.retain_mut(|entry| {
                if entry.result.timestamp_millis() >= horizon {
                    return true;
                }
                if !entry.matched {
                    match mode {
                        JoinMode::Left => emitted.push(entry.result.clone()),
                        JoinMode::Inner => {
                            trace!(key = %keys, window = %entry.result.window, "discarding unmatched result")
                        }
                    }
                }
                false
            });
            !pending.is_empty()
        });
        self.secondaries.retain(|_, records| {
            records.retain(|r| r.event_time >= horizon);
            !records.is_empty()
        });
    }
}

impl std::fmt::Debug for JoinStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (results, secondaries) = self.buffered();
        f.debug_struct("JoinStage")
            .field("mode", &self.mode)
            .field("window_ms", &self.window_ms)
            .field("results", &results)
            .field("secondaries", &secondaries)
            .finish()
    }
}
