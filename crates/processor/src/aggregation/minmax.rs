use super::function::{downcast_peer, ensure_finite, AggregateFunction};
use crate::error::AggregationError;
use std::any::Any;

fn empty(aggregation_type: &str) -> anyhow::Error {
    AggregationError::InsufficientData {
        aggregation_type: aggregation_type.to_string(),
        required: 1,
        actual: 0,
    }
    .into()
}

/// Min aggregator - tracks the minimum value seen
///
/// # Examples
///
/// ```
/// use processor::aggregation::{AggregateFunction, MinAggregator};
///
/// let mut agg = MinAggregator::new();
/// agg.add_value(30.0).unwrap();
/// agg.add_value(10.0).unwrap();
/// agg.add_value(20.0).unwrap();
///
/// assert_eq!(agg.compute().unwrap(), 10.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MinAggregator {
    min: Option<f64>,
    count: u64,
}

impl MinAggregator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AggregateFunction for MinAggregator {
    fn name(&self) -> &str {
        "min"
    }

    fn add_value(&mut self, value: f64) -> anyhow::Result<()> {
        ensure_finite(self.name(), value)?;
        self.min = Some(self.min.map_or(value, |current| current.min(value)));
        self.count += 1;
        Ok(())
    }

    fn merge(&mut self, other: &dyn AggregateFunction) -> anyhow::Result<()> {
        let other = downcast_peer::<Self>(&*self, other)?;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.count += other.count;
        Ok(())
    }

    fn compute(&self) -> anyhow::Result<f64> {
        self.min.ok_or_else(|| empty("min"))
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Max aggregator - tracks the maximum value seen
#[derive(Debug, Clone, Default)]
pub struct MaxAggregator {
    max: Option<f64>,
    count: u64,
}

impl MaxAggregator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AggregateFunction for MaxAggregator {
    fn name(&self) -> &str {
        "max"
    }

    fn add_value(&mut self, value: f64) -> anyhow::Result<()> {
        ensure_finite(self.name(), value)?;
        self.max = Some(self.max.map_or(value, |current| current.max(value)));
        self.count += 1;
        Ok(())
    }

    fn merge(&mut self, other: &dyn AggregateFunction) -> anyhow::Result<()> {
        let other = downcast_peer::<Self>(&*self, other)?;
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.count += other.count;
        Ok(())
    }

    fn compute(&self) -> anyhow::Result<f64> {
        self.max.ok_or_else(|| empty("max"))
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_basic() {
        let mut agg = MinAggregator::new();
        agg.add_values(&[30.0, 10.0, 20.0, -5.0]).unwrap();
        assert_eq!(agg.compute().unwrap(), -5.0);
        assert_eq!(agg.count(), 4);
    }

    #[test]
    fn test_max_basic() {
        let mut agg = MaxAggregator::new();
        agg.add_values(&[10.0, 30.0, 20.0]).unwrap();
        assert_eq!(agg.compute().unwrap(), 30.0);
    }

    #[test]
    fn test_empty() {
        assert!(MinAggregator::new().compute().is_err());
        assert!(MaxAggregator::new().compute().is_err());
    }

    #[test]
    fn test_merge_with_empty_side() {
        let mut agg1 = MinAggregator::new();
        let mut agg2 = MinAggregator::new();
        agg2.add_values(&[4.0, 2.0]).unwrap();

        agg1.merge(&agg2).unwrap();
        assert_eq!(agg1.compute().unwrap(), 2.0);

        let mut max1 = MaxAggregator::new();
        max1.add_value(9.0).unwrap();
        max1.merge(&MaxAggregator::new()).unwrap();
        assert_eq!(max1.compute().unwrap(), 9.0);
        assert_eq!(max1.count(), 1);
    }

    #[test]
    fn test_min_and_max_do_not_merge() {
        let mut min = MinAggregator::new();
        assert!(min.merge(&MaxAggregator::new()).is_err());
    }
}
