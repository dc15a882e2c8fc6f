//! Window assigners
//!
//! This module provides different strategies for assigning events to windows
//! based on their timestamps. All grids are aligned on the Unix epoch.

use super::types::WindowBounds;
use crate::error::{WindowError, WindowResult};
use metricflow_types::WindowSpec;
use std::fmt;

/// Trait for assigning events to windows
pub trait WindowAssigner: Send + Sync + fmt::Debug {
    /// Assign an event time (epoch millis) to one or more windows
    fn assign_windows(&self, timestamp: i64) -> WindowResult<Vec<WindowBounds>>;

    /// Get the maximum number of windows an event can be assigned to
    fn max_windows_per_event(&self) -> usize {
        1
    }

    /// Check if this is a session window assigner (requires merging)
    fn is_session_window(&self) -> bool {
        false
    }
}

/// `timestamp + offset`, rejecting event times that overflow the grid
fn shifted(timestamp: i64, offset: i64) -> WindowResult<i64> {
    timestamp
        .checked_add(offset)
        .ok_or_else(|| WindowError::InvalidTimestamp {
            timestamp,
            reason: String::from("event time out of range"),
        })
}

/// Start of the grid cell of `step` containing `timestamp`
fn grid_start(timestamp: i64, step: i64) -> WindowResult<i64> {
    timestamp
        .div_euclid(step)
        .checked_mul(step)
        .ok_or_else(|| WindowError::InvalidTimestamp {
            timestamp,
            reason: String::from("event time out of range"),
        })
}

/// Build the assigner for a window specification
pub fn assigner_for(spec: &WindowSpec) -> WindowResult<Box<dyn WindowAssigner>> {
    Ok(match *spec {
        WindowSpec::Tumbling { size_ms } => Box::new(TumblingWindowAssigner::new(size_ms)?),
        WindowSpec::Hopping {
            size_ms,
            advance_ms,
        } if size_ms == advance_ms => Box::new(TumblingWindowAssigner::new(size_ms)?),
        WindowSpec::Hopping {
            size_ms,
            advance_ms,
        } => Box::new(HoppingWindowAssigner::new(size_ms, advance_ms)?),
        WindowSpec::Session { gap_ms } => Box::new(SessionWindowAssigner::new(gap_ms)?),
    })
}

/// Tumbling window assigner
///
/// Creates fixed-size, non-overlapping windows. Each event is assigned to
/// exactly one window based on its timestamp.
///
/// # Example
/// ```text
/// Window size: 5 seconds
/// Event at timestamp 7 -> Window [5, 10)
/// Event at timestamp 12 -> Window [10, 15)
/// ```
#[derive(Debug, Clone)]
pub struct TumblingWindowAssigner {
    size: i64,
}

impl TumblingWindowAssigner {
    pub fn new(size_ms: u64) -> WindowResult<Self> {
        let size = i64::try_from(size_ms)
            .ok()
            .filter(|s| *s > 0)
            .ok_or(WindowError::InvalidWindowSize { size: size_ms })?;
        Ok(Self { size })
    }

}

impl WindowAssigner for TumblingWindowAssigner {
    fn assign_windows(&self, timestamp: i64) -> WindowResult<Vec<WindowBounds>> {
        let start = grid_start(timestamp, self.size)?;
        Ok(vec![WindowBounds::from_millis(start, shifted(start, self.size)?)?])
    }
}

/// Hopping window assigner
///
/// Creates fixed-size windows that start every `advance`. When the advance
/// is smaller than the size, windows overlap and an event belongs to
/// several of them.
///
/// # Example
/// ```text
/// Window size: 10 seconds, Advance: 5 seconds
/// Event at timestamp 7 -> Windows [0, 10), [5, 15)
/// Event at timestamp 12 -> Windows [5, 15), [10, 20)
/// ```
#[derive(Debug, Clone)]
pub struct HoppingWindowAssigner {
    size: i64,
    advance: i64,
}

impl HoppingWindowAssigner {
    pub fn new(size_ms: u64, advance_ms: u64) -> WindowResult<Self> {
        let size = i64::try_from(size_ms)
            .ok()
            .filter(|s| *s > 0)
            .ok_or(WindowError::InvalidWindowSize { size: size_ms })?;
        let advance = i64::try_from(advance_ms)
            .ok()
            .filter(|a| *a > 0 && *a <= size)
            .ok_or(WindowError::InvalidAdvance {
                advance: advance_ms,
                window: size_ms,
            })?;
        Ok(Self { size, advance })
    }
}

impl WindowAssigner for HoppingWindowAssigner {
    fn assign_windows(&self, timestamp: i64) -> WindowResult<Vec<WindowBounds>> {
        // Latest window start at or before the event, then walk back while
        // the window still covers it.
        let last_start = grid_start(timestamp, self.advance)?;
        let earliest = shifted(timestamp, -self.size)?;

        let mut windows = Vec::with_capacity(self.max_windows_per_event());
        let mut start = last_start;
        while start > earliest {
            windows.push(WindowBounds::from_millis(start, shifted(start, self.size)?)?);
            start = shifted(start, -self.advance)?;
        }
        windows.reverse();
        Ok(windows)
    }

    fn max_windows_per_event(&self) -> usize {
        ((self.size + self.advance - 1) / self.advance) as usize
    }
}

/// Session window assigner
///
/// Each event opens a proto-session `[t, t + gap)`. Sessions of the same
/// key that overlap or touch are merged by the aggregation stage, so the
/// final window of a burst is `[first, last + gap)`.
///
/// # Example
/// ```text
/// Session gap: 5 seconds
/// Events at 0, 2, 10 -> Windows [0, 7), [10, 15)
/// Event at 4 arrives -> Windows merge to [0, 9), [10, 15)
/// Event at 7 arrives -> [0, 9) and [7, 12) touch [10, 15): one session [0, 15)
/// ```
#[derive(Debug, Clone)]
pub struct SessionWindowAssigner {
    gap: i64,
}

impl SessionWindowAssigner {
    pub fn new(gap_ms: u64) -> WindowResult<Self> {
        let gap = i64::try_from(gap_ms)
            .ok()
            .filter(|g| *g > 0)
            .ok_or(WindowError::InvalidGapSize { gap: gap_ms })?;
        Ok(Self { gap })
    }

    /// Session gap in milliseconds
    pub fn gap(&self) -> i64 {
        self.gap
    }
}

impl WindowAssigner for SessionWindowAssigner {
    fn assign_windows(&self, timestamp: i64) -> WindowResult<Vec<WindowBounds>> {
        Ok(vec![WindowBounds::from_millis(timestamp, shifted(timestamp, self.gap)?)?])
    }

    fn is_session_window(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn starts(windows: &[WindowBounds]) -> Vec<i64> {
        windows.iter().map(|w| w.start_millis()).collect()
    }

    #[test]
    fn test_tumbling_assignment() {
        let assigner = TumblingWindowAssigner::new(5000).unwrap();

        let windows = assigner.assign_windows(7000).unwrap();
        assert_eq!(windows, vec![WindowBounds::from_millis(5000, 10000).unwrap()]);

        // boundary belongs to the next window
        let windows = assigner.assign_windows(10000).unwrap();
        assert_eq!(starts(&windows), vec![10000]);
    }

    #[test]
    fn test_tumbling_negative_timestamp() {
        let assigner = TumblingWindowAssigner::new(5000).unwrap();
        let windows = assigner.assign_windows(-1).unwrap();
        assert_eq!(windows, vec![WindowBounds::from_millis(-5000, 0).unwrap()]);
    }

    #[test]
    fn test_invalid_sizes() {
        assert!(TumblingWindowAssigner::new(0).is_err());
        assert!(HoppingWindowAssigner::new(10_000, 0).is_err());
        assert!(HoppingWindowAssigner::new(10_000, 20_000).is_err());
        assert!(SessionWindowAssigner::new(0).is_err());
    }

    #[test]
    fn test_hopping_assignment() {
        let assigner = HoppingWindowAssigner::new(10_000, 5000).unwrap();

        assert_eq!(starts(&assigner.assign_windows(7000).unwrap()), vec![0, 5000]);
        assert_eq!(starts(&assigner.assign_windows(12_000).unwrap()), vec![5000, 10_000]);
        assert_eq!(assigner.max_windows_per_event(), 2);
    }

    #[test]
    fn test_hopping_every_event_in_every_covering_window() {
        let assigner = HoppingWindowAssigner::new(60_000, 10_000).unwrap();
        for t in [0, 1, 9_999, 10_000, 59_999, 123_456, -1, -60_000] {
            let windows = assigner.assign_windows(t).unwrap();
            assert_eq!(windows.len(), 6, "t={}", t);
            assert!(windows.iter().all(|w| w.contains_millis(t)), "t={}", t);
        }
    }

    #[test]
    fn test_hopping_uneven_advance() {
        // 25s windows every 10s: two or three windows depending on phase
        let assigner = HoppingWindowAssigner::new(25_000, 10_000).unwrap();
        assert_eq!(assigner.max_windows_per_event(), 3);
        assert_eq!(starts(&assigner.assign_windows(21_000).unwrap()), vec![0, 10_000, 20_000]);
        assert_eq!(starts(&assigner.assign_windows(26_000).unwrap()), vec![10_000, 20_000]);
    }

    #[test]
    fn test_session_assignment() {
        let assigner = SessionWindowAssigner::new(5000).unwrap();
        assert!(assigner.is_session_window());
        assert_eq!(
            assigner.assign_windows(2000).unwrap(),
            vec![WindowBounds::from_millis(2000, 7000).unwrap()]
        );
    }

    #[test]
    fn test_out_of_range_event_time_is_rejected() {
        let tumbling = TumblingWindowAssigner::new(60_000).unwrap();
        let hopping = HoppingWindowAssigner::new(60_000, 10_000).unwrap();
        let session = SessionWindowAssigner::new(5000).unwrap();

        for t in [i64::MAX, i64::MAX - 1] {
            assert!(matches!(
                tumbling.assign_windows(t),
                Err(WindowError::InvalidTimestamp { .. })
            ));
            assert!(matches!(
                hopping.assign_windows(t),
                Err(WindowError::InvalidTimestamp { .. })
            ));
            assert!(matches!(
                session.assign_windows(t),
                Err(WindowError::InvalidTimestamp { .. })
            ));
        }
        assert!(tumbling.assign_windows(i64::MIN).is_err());
        assert!(hopping.assign_windows(i64::MIN).is_err());
    }

    #[test]
    fn test_assigner_for_spec() {
        let tumbling = assigner_for(&WindowSpec::Hopping {
            size_ms: 60_000,
            advance_ms: 60_000,
        })
        .unwrap();
        assert_eq!(tumbling.max_windows_per_event(), 1);
        assert_eq!(tumbling.assign_windows(61_000).unwrap().len(), 1);

        let session = assigner_for(&WindowSpec::Session { gap_ms: 1000 }).unwrap();
        assert!(session.is_session_window());

        assert!(assigner_for(&WindowSpec::Tumbling { size_ms: 0 }).is_err());
    }
}
