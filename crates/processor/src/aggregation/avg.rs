use super::function::{downcast_peer, ensure_finite, AggregateFunction};
use crate::error::AggregationError;
use std::any::Any;

/// Average aggregator - computes the mean of all values
///
/// Keeps a running sum and count so that merging two partial averages is
/// exact.
///
/// # Examples
///
/// ```
/// use processor::aggregation::{AggregateFunction, AverageAggregator};
///
/// let mut agg = AverageAggregator::new();
/// agg.add_value(10.0).unwrap();
/// agg.add_value(20.0).unwrap();
/// agg.add_value(30.0).unwrap();
///
/// assert_eq!(agg.compute().unwrap(), 20.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct AverageAggregator {
    sum: f64,
    count: u64,
}

impl AverageAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current mean value
    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

impl AggregateFunction for AverageAggregator {
    fn name(&self) -> &str {
        "avg"
    }

    fn add_value(&mut self, value: f64) -> anyhow::Result<()> {
        ensure_finite(self.name(), value)?;
        self.sum += value;
        self.count += 1;
        Ok(())
    }

    fn merge(&mut self, other: &dyn AggregateFunction) -> anyhow::Result<()> {
        let other = downcast_peer::<Self>(&*self, other)?;
        self.sum += other.sum;
        self.count += other.count;
        Ok(())
    }

    fn compute(&self) -> anyhow::Result<f64> {
        self.mean().ok_or_else(|| {
            AggregationError::InsufficientData {
                aggregation_type: "avg".to_string(),
                required: 1,
                actual: 0,
            }
            .into()
        })
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
