use super::function::{downcast_peer, ensure_finite, AggregateFunction};
use crate::error::AggregationError;
use std::any::Any;

/// Standard deviation aggregator
///
/// Uses Welford's online algorithm for numerical stability, and Chan's
/// parallel update when two accumulators are merged. [`new`](Self::new)
/// computes the sample standard deviation (Bessel's correction, n-1);
/// [`population`](Self::population) divides by n.
///
/// # Examples
///
/// ```
/// use processor::aggregation::{AggregateFunction, StandardDeviationAggregator};
///
/// let mut agg = StandardDeviationAggregator::new();
/// agg.add_values(&[10.0, 12.0, 14.0, 16.0, 18.0]).unwrap();
///
/// let stddev = agg.compute().unwrap();
/// assert!((stddev - 3.1622).abs() < 0.01);
/// ```
#[derive(Debug, Clone)]
pub struct StandardDeviationAggregator {
    count: u64,
    mean: f64,
    m2: f64, // Sum of squared differences from mean
    sample: bool,
}

impl StandardDeviationAggregator {
    /// Sample standard deviation (uses n-1)
    pub fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            sample: true,
        }
    }

    /// Population standard deviation (uses n)
    pub fn population() -> Self {
        Self {
            sample: false,
            ..Self::new()
        }
    }

    pub fn variance(&self) -> Option<f64> {
        let divisor = if self.sample {
            self.count.checked_sub(1).filter(|d| *d > 0)?
        } else {
            Some(self.count).filter(|c| *c > 0)?
        };
        Some(self.m2 / divisor as f64)
    }

    pub fn std_dev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }
}

impl Default for StandardDeviationAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregateFunction for StandardDeviationAggregator {
    fn name(&self) -> &str {
        if self.sample {
            "stddev"
        } else {
            "stddev_pop"
        }
    }

    fn add_value(&mut self, value: f64) -> anyhow::Result<()> {
        ensure_finite(self.name(), value)?;
        self.count += 1;

        // Welford's online algorithm
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;

        Ok(())
    }

    fn merge(&mut self, other: &dyn AggregateFunction) -> anyhow::Result<()> {
        let other = downcast_peer::<Self>(&*self, other)?;
        if other.sample != self.sample {
            return Err(AggregationError::IncompatibleMerge {
                left: self.name().to_string(),
                right: other.name().to_string(),
            }
            .into());
        }
        if other.count == 0 {
            return Ok(());
        }
        if self.count == 0 {
            self.count = other.count;
            self.mean = other.mean;
            self.m2 = other.m2;
            return Ok(());
        }

        let total = self.count + other.count;
        let delta = other.mean - self.mean;
        let (n_a, n_b) = (self.count as f64, other.count as f64);

        self.mean += delta * n_b / total as f64;
        self.m2 += other.m2 + delta * delta * n_a * n_b / total as f64;
        self.count = total;
        Ok(())
    }

    fn compute(&self) -> anyhow::Result<f64> {
        let required = if self.sample { 2 } else { 1 };
        self.std_dev().ok_or_else(|| {
            AggregationError::InsufficientData {
                aggregation_type: self.name().to_string(),
                required,
                actual: self.count,
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
