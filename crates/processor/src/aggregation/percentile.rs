use super::function::{downcast_peer, ensure_finite, AggregateFunction};
use crate::error::AggregationError;
use std::any::Any;

/// Percentile aggregator - computes percentiles (p50, p95, p99, etc.)
///
/// Stores every value and interpolates linearly between the two closest
/// ranks. Merging concatenates the samples, so the result does not depend
/// on how values were split between accumulators.
///
/// # Examples
///
/// ```
/// use processor::aggregation::{AggregateFunction, PercentileAggregator};
///
/// let mut agg = PercentileAggregator::p95();
/// for i in 1..=100 {
///     agg.add_value(i as f64).unwrap();
/// }
///
/// let p95 = agg.compute().unwrap();
/// assert!((p95 - 95.0).abs() < 1.0);
/// ```
#[derive(Debug, Clone)]
pub struct PercentileAggregator {
    name: String,
    values: Vec<f64>,
    percentile: f64,
}

impl PercentileAggregator {
    /// Create an aggregator for a custom percentile (0.0 to 100.0)
    pub fn new(name: impl Into<String>, percentile: f64) -> Result<Self, AggregationError> {
        if !(0.0..=100.0).contains(&percentile) {
            return Err(AggregationError::InvalidValue {
                value: percentile,
                reason: "percentile must be between 0 and 100".to_string(),
            });
        }
        Ok(Self {
            name: name.into(),
            values: Vec::new(),
            percentile,
        })
    }

    fn fixed(name: &str, percentile: f64) -> Self {
        Self {
            name: name.to_string(),
            values: Vec::new(),
            percentile,
        }
    }

    /// p50
    pub fn median() -> Self {
        Self::fixed("median", 50.0)
    }

    pub fn p90() -> Self {
        Self::fixed("p90", 90.0)
    }

    pub fn p95() -> Self {
        Self::fixed("p95", 95.0)
    }

    pub fn p99() -> Self {
        Self::fixed("p99", 99.0)
    }

    fn calculate_percentile(sorted_values: &[f64], percentile: f64) -> Option<f64> {
        match sorted_values {
            [] => None,
            [only] => Some(*only),
            _ => {
                let rank = (percentile / 100.0) * (sorted_values.len() - 1) as f64;
                let lower_idx = rank.floor() as usize;
                let upper_idx = rank.ceil() as usize;
                let fraction = rank - lower_idx as f64;
                Some(
                    sorted_values[lower_idx] * (1.0 - fraction)
                        + sorted_values[upper_idx] * fraction,
                )
            }
        }
    }
}

impl AggregateFunction for PercentileAggregator {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_value(&mut self, value: f64) -> anyhow::Result<()> {
        ensure_finite(&self.name, value)?;
        self.values.push(value);
        Ok(())
    }

    fn merge(&mut self, other: &dyn AggregateFunction) -> anyhow::Result<()> {
        let other = downcast_peer::<Self>(&*self, other)?;
        if (self.percentile - other.percentile).abs() > f64::EPSILON {
            return Err(AggregationError::IncompatibleMerge {
                left: self.name.clone(),
                right: other.name.clone(),
            }
            .into());
        }
        self.values.extend_from_slice(&other.values);
        Ok(())
    }

    fn compute(&self) -> anyhow::Result<f64> {
        let mut sorted = self.values.clone();
        sorted.sort_by(f64::total_cmp);

        Self::calculate_percentile(&sorted, self.percentile).ok_or_else(|| {
            AggregationError::InsufficientData {
                aggregation_type: self.name.clone(),
                required: 1,
                actual: 0,
            }
            .into()
        })
    }

    fn count(&self) -> u64 {
        self.values.len() as u64
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
