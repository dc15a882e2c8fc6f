//! Event-time watermarks
//!
//! A watermark is the timestamp below which no more events are expected.
//! Windows whose end is at or below the watermark are closed. The
//! watermark only moves forward, so arrival order decides when a window
//! closes and replays of the same partition close windows at the same
//! points.
//!
//! # Example
//!
//! ```rust
//! use processor::watermark::{BoundedOutOfOrdernessWatermark, WatermarkGenerator};
//! use std::time::Duration;
//!
//! let mut generator = BoundedOutOfOrdernessWatermark::new(Duration::from_secs(10));
//!
//! let watermark = generator.on_event(60_000).unwrap();
//! assert_eq!(watermark.timestamp, 50_000);
//!
//! // an older event never moves the watermark back
//! assert!(generator.on_event(55_000).is_none());
//! assert!(generator.is_late(40_000));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Represents a watermark timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Watermark {
    /// The watermark timestamp in milliseconds since epoch
    pub timestamp: i64,
}

impl Watermark {
    pub fn new(timestamp: i64) -> Self {
        Self { timestamp }
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self {
            timestamp: dt.timestamp_millis(),
        }
    }

    /// Watermark before any event
    pub fn min() -> Self {
        Self {
            timestamp: i64::MIN,
        }
    }

    /// Watermark after every event; closes everything
    pub fn max() -> Self {
        Self {
            timestamp: i64::MAX,
        }
    }

    /// Whether `timestamp` is strictly behind this watermark
    pub fn is_after(&self, timestamp: i64) -> bool {
        timestamp < self.timestamp
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::min()
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Watermark({})", self.timestamp)
    }
}

/// Trait for watermark generation strategies
pub trait WatermarkGenerator: Send + Sync {
    /// Observe an event time; returns the new watermark if it advanced
    fn on_event(&mut self, timestamp: i64) -> Option<Watermark>;

    /// Current watermark
    fn current_watermark(&self) -> Watermark;

    /// Whether an event at `timestamp` is behind the current watermark
    fn is_late(&self, timestamp: i64) -> bool {
        self.current_watermark().is_after(timestamp)
    }
}

/// Watermark trailing the highest event time by a fixed bound
#[derive(Debug, Clone)]
pub struct BoundedOutOfOrdernessWatermark {
    max_out_of_orderness: i64,
    max_timestamp: Option<i64>,
    current: Watermark,
}

impl BoundedOutOfOrdernessWatermark {
    pub fn new(max_out_of_orderness: Duration) -> Self {
        Self {
            max_out_of_orderness: i64::try_from(max_out_of_orderness.as_millis())
                .unwrap_or(i64::MAX),
            max_timestamp: None,
            current: Watermark::min(),
        }
    }

    /// Highest event time observed
    pub fn max_timestamp(&self) -> Option<i64> {
        self.max_timestamp
    }
}

impl WatermarkGenerator for BoundedOutOfOrdernessWatermark {
    fn on_event(&mut self, timestamp: i64) -> Option<Watermark> {
        let max_timestamp = self.max_timestamp.map_or(timestamp, |m| m.max(timestamp));
        self.max_timestamp = Some(max_timestamp);

        let candidate = Watermark::new(max_timestamp.saturating_sub(self.max_out_of_orderness));
        if candidate > self.current {
            self.current = candidate;
            Some(candidate)
        } else {
            None
        }
    }

    fn current_watermark(&self) -> Watermark {
        self.current
    }
}
