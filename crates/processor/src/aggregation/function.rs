use crate::error::AggregationError;
use std::any::Any;
use std::fmt::Debug;

/// A pluggable, stateful accumulator.
///
/// One instance is owned by each (key, window) cell. Values are folded in
/// with [`add_value`](AggregateFunction::add_value), two instances of the
/// same function are combined with [`merge`](AggregateFunction::merge) when
/// session windows coalesce, and [`compute`](AggregateFunction::compute)
/// produces the window's result.
///
/// `add_value` and `merge` must be associative and commutative: computing
/// after merging two accumulators must give the same result as folding
/// every value into one.
pub trait AggregateFunction: Send + Sync + Debug {
    /// Registry name of the function
    fn name(&self) -> &str;

    /// Fold a single value into the accumulator
    fn add_value(&mut self, value: f64) -> anyhow::Result<()>;

    /// Merge another accumulator of the same function into this one
    fn merge(&mut self, other: &dyn AggregateFunction) -> anyhow::Result<()>;

    /// Produce the aggregate over every value seen so far
    fn compute(&self) -> anyhow::Result<f64>;

    /// Number of values folded in, including merged ones
    fn count(&self) -> u64;

    fn as_any(&self) -> &dyn Any;

    /// Fold several values
    fn add_values(&mut self, values: &[f64]) -> anyhow::Result<()> {
        for value in values {
            self.add_value(*value)?;
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

/// Reject NaN and infinite inputs.
pub(crate) fn ensure_finite(function: &str, value: f64) -> Result<(), AggregationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(AggregationError::InvalidValue {
            value,
            reason: format!("{} only accepts finite values", function),
        })
    }
}

/// Downcast the other side of a merge to the concrete accumulator type.
pub(crate) fn downcast_peer<'a, T: 'static>(
    this: &dyn AggregateFunction,
    other: &'a dyn AggregateFunction,
) -> Result<&'a T, AggregationError> {
    other
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| AggregationError::IncompatibleMerge {
            left: this.name().to_string(),
            right: other.name().to_string(),
        })
}
