use super::function::{downcast_peer, AggregateFunction};
use std::any::Any;

/// Count aggregator - counts the values seen, whatever they are
///
/// Unlike the other aggregators, count accepts non-finite values: a
/// sentinel or NaN still represents one record.
///
/// # Examples
///
/// ```
/// use processor::aggregation::{AggregateFunction, CountAggregator};
///
/// let mut agg = CountAggregator::new();
/// agg.add_value(1.0).unwrap();
/// agg.add_value(2.0).unwrap();
/// agg.add_value(3.0).unwrap();
///
/// assert_eq!(agg.compute().unwrap(), 3.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CountAggregator {
    count: u64,
}

impl CountAggregator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AggregateFunction for CountAggregator {
    fn name(&self) -> &str {
        "count"
    }

    fn add_value(&mut self, _value: f64) -> anyhow::Result<()> {
        self.count += 1;
        Ok(())
    }

    fn merge(&mut self, other: &dyn AggregateFunction) -> anyhow::Result<()> {
        let other = downcast_peer::<Self>(&*self, other)?;
        self.count += other.count;
        Ok(())
    }

    fn compute(&self) -> anyhow::Result<f64> {
        Ok(self.count as f64)
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
    use crate::aggregation::SumAggregator;

    #[test]
    fn test_count_basic() {
        let mut agg = CountAggregator::new();
        assert!(agg.is_empty());
        assert_eq!(agg.compute().unwrap(), 0.0);

        agg.add_values(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(agg.count(), 3);
        assert_eq!(agg.compute().unwrap(), 3.0);
    }

    #[test]
    fn test_count_accepts_nan() {
        let mut agg = CountAggregator::new();
        agg.add_value(f64::NAN).unwrap();
        assert_eq!(agg.compute().unwrap(), 1.0);
    }

    #[test]
    fn test_count_merge() {
        let mut agg1 = CountAggregator::new();
        agg1.add_values(&[1.0, 2.0]).unwrap();

        let mut agg2 = CountAggregator::new();
        agg2.add_values(&[3.0, 4.0, 5.0]).unwrap();

        agg1.merge(&agg2).unwrap();
        assert_eq!(agg1.compute().unwrap(), 5.0);
    }

    #[test]
    fn test_count_merge_rejects_other_function() {
        let mut agg = CountAggregator::new();
        let sum = SumAggregator::new();
        let err = agg.merge(&sum).unwrap_err();
        assert!(err.to_string().contains("cannot merge sum accumulator into count"));
    }
}
