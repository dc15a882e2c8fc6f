//! Window bounds
//!
//! A window is identified by its half-open event-time interval
//! `[start, end)`.

use crate::error::{WindowError, WindowResult};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Convert epoch milliseconds to a UTC timestamp
pub fn datetime_from_millis(millis: i64) -> WindowResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| WindowError::InvalidTimestamp {
            timestamp: millis,
            reason: "out of range".to_string(),
        })
}

/// Represents the time bounds of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowBounds {
    /// Start time of the window (inclusive)
    pub start: DateTime<Utc>,
    /// End time of the window (exclusive)
    pub end: DateTime<Utc>,
}

impl WindowBounds {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> WindowResult<Self> {
        if start >= end {
            return Err(WindowError::InvalidWindowSize {
                size: end
                    .signed_duration_since(start)
                    .num_milliseconds()
                    .max(0) as u64,
            });
        }
        Ok(Self { start, end })
    }

    pub fn from_millis(start: i64, end: i64) -> WindowResult<Self> {
        Self::new(datetime_from_millis(start)?, datetime_from_millis(end)?)
    }

    pub fn start_millis(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_millis(&self) -> i64 {
        self.end.timestamp_millis()
    }

    pub fn duration(&self) -> Duration {
        self.end.signed_duration_since(self.start)
    }

    /// Check if a timestamp (epoch millis) falls within this window
    pub fn contains_millis(&self, timestamp: i64) -> bool {
        timestamp >= self.start_millis() && timestamp < self.end_millis()
    }

    /// Check if this window overlaps with another window
    pub fn overlaps(&self, other: &WindowBounds) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Overlapping or back-to-back; session windows in this relation coalesce
    pub fn touches(&self, other: &WindowBounds) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Smallest window covering both
    pub fn cover(&self, other: &WindowBounds) -> WindowBounds {
        WindowBounds {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for WindowBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} - {})",
            self.start.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.end.format("%Y-%m-%d %H:%M:%S%.3f")
        )
    }
}

impl PartialOrd for WindowBounds {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WindowBounds {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.start
            .cmp(&other.start)
            .then_with(|| self.end.cmp(&other.end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(start: i64, end: i64) -> WindowBounds {
        WindowBounds::from_millis(start, end).unwrap()
    }

    #[test]
    fn test_window_bounds_creation() {
        let b = bounds(1000, 2000);
        assert_eq!(b.start_millis(), 1000);
        assert_eq!(b.end_millis(), 2000);
        assert_eq!(b.duration(), Duration::milliseconds(1000));
    }

    #[test]
    fn test_window_bounds_invalid() {
        assert!(WindowBounds::from_millis(2000, 1000).is_err());
        assert!(WindowBounds::from_millis(1000, 1000).is_err());
        assert!(WindowBounds::from_millis(i64::MAX - 1, i64::MAX).is_err());
    }

    #[test]
    fn test_window_bounds_contains() {
        let b = bounds(1000, 2000);

        assert!(!b.contains_millis(999));
        assert!(b.contains_millis(1000));
        assert!(b.contains_millis(1999));
        assert!(!b.contains_millis(2000));
    }

    #[test]
    fn test_overlaps_and_touches() {
        let a = bounds(1000, 2000);
        let b = bounds(1500, 2500);
        let c = bounds(2000, 3000);
        let d = bounds(2001, 3000);

        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(a.touches(&c));
        assert!(!a.touches(&d));
    }

    #[test]
    fn test_cover() {
        let merged = bounds(1000, 2000).cover(&bounds(1500, 4000));
        assert_eq!(merged, bounds(1000, 4000));
    }

    #[test]
    fn test_ordering() {
        let mut windows = vec![bounds(3000, 4000), bounds(1000, 3000), bounds(1000, 2000)];
        windows.sort();
        assert_eq!(
            windows,
            vec![bounds(1000, 2000), bounds(1000, 3000), bounds(3000, 4000)]
        );
    }
}
