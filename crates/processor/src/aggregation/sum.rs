use super::function::{downcast_peer, ensure_finite, AggregateFunction};
use std::any::Any;

/// Sum aggregator - adds up every value
///
/// # Examples
///
/// ```
/// use processor::aggregation::{AggregateFunction, SumAggregator};
///
/// let mut agg = SumAggregator::new();
/// agg.add_value(5.0).unwrap();
/// agg.add_value(7.0).unwrap();
///
/// assert_eq!(agg.compute().unwrap(), 12.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SumAggregator {
    sum: f64,
    count: u64,
}

impl SumAggregator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AggregateFunction for SumAggregator {
    fn name(&self) -> &str {
        "sum"
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
        Ok(self.sum)
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
    fn test_sum_basic() {
        let mut agg = SumAggregator::new();
        agg.add_values(&[10.0, 20.0, 30.0]).unwrap();

        assert_eq!(agg.count(), 3);
        assert_eq!(agg.compute().unwrap(), 60.0);
    }

    #[test]
    fn test_sum_negative_values() {
        let mut agg = SumAggregator::new();
        agg.add_values(&[10.0, -5.0, -2.5]).unwrap();
        assert_eq!(agg.compute().unwrap(), 2.5);
    }

    #[test]
    fn test_sum_rejects_infinity() {
        let mut agg = SumAggregator::new();
        assert!(agg.add_value(f64::INFINITY).is_err());
        assert_eq!(agg.count(), 0);
    }

    #[test]
    fn test_sum_merge() {
        let mut agg1 = SumAggregator::new();
        agg1.add_values(&[1.0, 2.0, 3.0]).unwrap();

        let mut agg2 = SumAggregator::new();
        agg2.add_values(&[4.0, 5.0, 6.0]).unwrap();

        agg1.merge(&agg2).unwrap();
        assert_eq!(agg1.compute().unwrap(), 21.0);
        assert_eq!(agg1.count(), 6);
    }
}
