//! Windowed aggregation stage
//!
//! [`WindowedAggregator`] owns the accumulators of one source partition.
//! Each (key, window) cell moves through a fixed lifecycle:
//!
//! ```text
//!  first value      more values        watermark >= end       result emitted
//! ──────────────▶ Open ──────▶ Accumulating ──────────▶ Closing ──────────▶ Closed
//! ```
//!
//! Cells are created from the pipeline's aggregate factory, folded with
//! `add_value`, and finalized with `compute` once the event-time watermark
//! reaches the window end. Session cells of the same key that overlap or
//! touch are coalesced with `merge` before either closes.
//!
//! Failures stay inside their cell: an `add_value` error poisons the cell
//! and a poisoned cell or a failing `compute` produces no result. Both are
//! logged with the key and window.

use crate::aggregation::{AggregateFactory, AggregateFunction};
use crate::error::WindowResult;
use crate::result::WindowedResult;
use crate::rules::MetricRules;
use crate::watermark::{BoundedOutOfOrdernessWatermark, Watermark, WatermarkGenerator};
use crate::window::{assigner_for, WindowAssigner, WindowBounds};
use metricflow_types::{Keys, Record, WindowSpec};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Why a record was not aggregated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// No usable event time
    MissingTimestamp,
    /// The event time cannot be placed in a window
    InvalidTimestamp,
    /// The aggregated field is not numeric and the policy is to drop
    NonNumeric,
    /// Every window the record belongs to has already closed
    Late,
    /// The aggregate function rejected the value
    FunctionError,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::MissingTimestamp => "missing_timestamp",
            DropReason::InvalidTimestamp => "invalid_timestamp",
            DropReason::NonNumeric => "non_numeric",
            DropReason::Late => "late",
            DropReason::FunctionError => "function_error",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to a record entering the stage. Exactly one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordOutcome {
    Filtered,
    Dropped(DropReason),
    Aggregated,
}

impl RecordOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordOutcome::Filtered => "filtered",
            RecordOutcome::Dropped(_) => "dropped",
            RecordOutcome::Aggregated => "aggregated",
        }
    }
}

#[derive(Debug)]
struct WindowCell {
    window: WindowBounds,
    accumulator: Box<dyn AggregateFunction>,
    poisoned: bool,
}

/// Per-partition windowed aggregation state
pub struct WindowedAggregator {
    rules: Arc<dyn MetricRules>,
    factory: AggregateFactory,
    assigner: Box<dyn WindowAssigner>,
    watermark: BoundedOutOfOrdernessWatermark,
    cells: HashMap<Keys, Vec<WindowCell>>,
    /// Smallest end among open cells
    earliest_end: Option<i64>,
    closed: Vec<WindowedResult>,
}

impl WindowedAggregator {
    pub fn new(
        rules: Arc<dyn MetricRules>,
        factory: AggregateFactory,
        window: &WindowSpec,
        allowed_lateness: Duration,
    ) -> WindowResult<Self> {
        Ok(Self {
            rules,
            factory,
            assigner: assigner_for(window)?,
            watermark: BoundedOutOfOrdernessWatermark::new(allowed_lateness),
            cells: HashMap::new(),
            earliest_end: None,
            closed: Vec::new(),
        })
    }

    /// Run one record through filtering, keying and folding.
    ///
    /// Windows closed by the watermark advance are kept until
    /// [`take_closed`](Self::take_closed) is called.
    pub fn process(&mut self, record: &Record) -> RecordOutcome {
        if !self.rules.filter_key(record) || !self.rules.filter(record) {
            return RecordOutcome::Filtered;
        }

        let keys = self.rules.select_key(record);

        let Some(value) = self.rules.map_value(record) else {
            debug!(pipeline = self.rules.name(), key = %keys, "dropping record without numeric value");
            return RecordOutcome::Dropped(DropReason::NonNumeric);
        };

        let Some(event_time) = self.rules.event_time(record) else {
            debug!(pipeline = self.rules.name(), key = %keys, "dropping record without event time");
            return RecordOutcome::Dropped(DropReason::MissingTimestamp);
        };

        let windows = match self.assigner.assign_windows(event_time) {
            Ok(windows) => windows,
            Err(e) => {
                warn!(pipeline = self.rules.name(), key = %keys, error = %e, "window assignment failed");
                return RecordOutcome::Dropped(DropReason::InvalidTimestamp);
            }
        };

        let watermark = self.watermark.current_watermark();
        let open: Vec<WindowBounds> = windows
            .into_iter()
            .filter(|w| w.end_millis() > watermark.timestamp)
            .collect();
        if open.is_empty() {
            debug!(
                pipeline = self.rules.name(),
                key = %keys,
                event_time,
                watermark = watermark.timestamp,
                "dropping late record"
            );
            return RecordOutcome::Dropped(DropReason::Late);
        }

        let folded = if self.assigner.is_session_window() {
            open.into_iter()
                .filter(|w| self.fold_session(&keys, *w, value))
                .count()
        } else {
            open.into_iter()
                .filter(|w| self.fold_fixed(&keys, *w, value))
                .count()
        };

        if let Some(advanced) = self.watermark.on_event(event_time) {
            self.close_until(advanced);
        }

        if folded == 0 {
            RecordOutcome::Dropped(DropReason::FunctionError)
        } else {
            RecordOutcome::Aggregated
        }
    }

    /// Results of windows closed since the last call, ordered by window end
    pub fn take_closed(&mut self) -> Vec<WindowedResult> {
        std::mem::take(&mut self.closed)
    }

    /// Close every open window regardless of the watermark.
    ///
    /// Used on shutdown; also returns results not yet taken.
    pub fn flush_all(&mut self) -> Vec<WindowedResult> {
        self.close_until(Watermark::max());
        self.take_closed()
    }

    pub fn current_watermark(&self) -> Watermark {
        self.watermark.current_watermark()
    }

    /// Number of open (key, window) cells
    pub fn open_windows(&self) -> usize {
        self.cells.values().map(Vec::len).sum()
    }

    fn new_cell(&self, window: WindowBounds) -> WindowCell {
        WindowCell {
            window,
            accumulator: (self.factory)(),
            poisoned: false,
        }
    }

    fn add_to_cell(&self, keys: &Keys, cell: &mut WindowCell, value: f64) -> bool {
        match cell.accumulator.add_value(value) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    pipeline = self.rules.name(),
                    key = %keys,
                    window = %cell.window,
                    function = cell.accumulator.name(),
                    error = %e,
                    "add_value failed, window result will be dropped"
                );
                cell.poisoned = true;
                false
            }
        }
    }

    fn fold_fixed(&mut self, keys: &Keys, window: WindowBounds, value: f64) -> bool {
        let mut cells = self.cells.remove(keys).unwrap_or_default();
        let index = match cells.iter().position(|c| c.window == window) {
            Some(index) => index,
            None => {
                trace!(key = %keys, window = %window, "opening window");
                cells.push(self.new_cell(window));
                cells.len() - 1
            }
        };
        let added = self.add_to_cell(keys, &mut cells[index], value);
        self.track_end(window.end_millis());
        self.cells.insert(keys.clone(), cells);
        added
    }

    fn fold_session(&mut self, keys: &Keys, window: WindowBounds, value: f64) -> bool {
        let mut cells = self.cells.remove(keys).unwrap_or_default();

        let mut session = self.new_cell(window);
        let added = self.add_to_cell(keys, &mut session, value);

        // Absorb every open session that overlaps or touches the new one
        while let Some(index) = cells.iter().position(|c| c.window.touches(&session.window)) {
            let other = cells.swap_remove(index);
            trace!(key = %keys, left = %session.window, right = %other.window, "merging sessions");
            session.window = session.window.cover(&other.window);
            session.poisoned |= other.poisoned;
            if let Err(e) = session.accumulator.merge(other.accumulator.as_ref()) {
                warn!(
                    pipeline = self.rules.name(),
                    key = %keys,
                    window = %session.window,
                    error = %e,
                    "session merge failed, window result will be dropped"
                );
                session.poisoned = true;
            }
        }

        self.track_end(session.window.end_millis());
        cells.push(session);
        self.cells.insert(keys.clone(), cells);
        added
    }

    fn track_end(&mut self, end: i64) {
        self.earliest_end = Some(self.earliest_end.map_or(end, |e| e.min(end)));
    }

    fn close_until(&mut self, watermark: Watermark) {
        match self.earliest_end {
            Some(end) if end <= watermark.timestamp => {}
            _ => return,
        }

        let mut closing: Vec<(Keys, WindowCell)> = Vec::new();
        let mut earliest_end: Option<i64> = None;

        self.cells.retain(|keys, cells| {
            let mut index = 0;
            while index < cells.len() {
                if cells[index].window.end_millis() <= watermark.timestamp {
                    closing.push((keys.clone(), cells.swap_remove(index)));
                } else {
                    let end = cells[index].window.end_millis();
                    earliest_end = Some(earliest_end.map_or(end, |e: i64| e.min(end)));
                    index += 1;
                }
            }
            !cells.is_empty()
        });
        self.earliest_end = earliest_end;

        closing.sort_by(|(ka, a), (kb, b)| {
            a.window
                .end
                .cmp(&b.window.end)
                .then_with(|| a.window.start.cmp(&b.window.start))
                .then_with(|| ka.cmp(kb))
        });

        for (keys, cell) in closing {
            if let Some(result) = self.finalize(keys, cell) {
                self.closed.push(result);
            }
        }
    }

    fn finalize(&self, keys: Keys, cell: WindowCell) -> Option<WindowedResult> {
        if cell.poisoned {
            warn!(
                pipeline = self.rules.name(),
                key = %keys,
                window = %cell.window,
                "dropping result of window with failed values"
            );
            return None;
        }
        match cell.accumulator.compute() {
            Ok(value) => {
                trace!(key = %keys, window = %cell.window, value, "window closed");
                Some(WindowedResult {
                    keys,
                    window: cell.window,
                    value,
                })
            }
            Err(e) => {
                warn!(
                    pipeline = self.rules.name(),
                    key = %keys,
                    window = %cell.window,
                    function = cell.accumulator.name(),
                    error = %e,
                    "compute failed, window result dropped"
                );
                None
            }
        }
    }
}

impl fmt::Debug for WindowedAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowedAggregator")
            .field("pipeline", &self.rules.name())
            .field("assigner", &self.assigner)
            .field("open_windows", &self.open_windows())
            .field("watermark", &self.current_watermark())
            .finish()
    }
}
