//! Aggregate functions for windowed streams
//!
//! Every aggregator implements [`AggregateFunction`]: values are folded in
//! one at a time, two accumulators of the same function can be merged, and
//! `compute` produces the numeric result. The [`AggregateRegistry`] maps the
//! function names used in pipeline definitions to factories.
//!
//! # Available Aggregators
//!
//! - [`CountAggregator`]: `count`
//! - [`SumAggregator`]: `sum`
//! - [`AverageAggregator`]: `avg`
//! - [`MinAggregator`], [`MaxAggregator`]: `min`, `max`
//! - [`StandardDeviationAggregator`]: `stddev`, `stddev_pop`
//! - [`PercentileAggregator`]: `median`, `p90`, `p95`, `p99`
//!
//! # Examples
//!
//! ```rust
//! use processor::aggregation::AggregateRegistry;
//!
//! let registry = AggregateRegistry::with_defaults();
//! let factory = registry.resolve("avg").unwrap();
//!
//! // Two partial accumulators, e.g. two coalescing sessions
//! let mut first = factory();
//! first.add_values(&[1.0, 2.0, 3.0]).unwrap();
//! let mut second = factory();
//! second.add_values(&[4.0, 5.0]).unwrap();
//!
//! first.merge(second.as_ref()).unwrap();
//! assert_eq!(first.compute().unwrap(), 3.0);
//! ```

mod avg;
mod count;
mod function;
mod minmax;
mod percentile;
mod registry;
mod stddev;
mod sum;

pub use avg::AverageAggregator;
pub use count::CountAggregator;
pub use function::AggregateFunction;
pub use minmax::{MaxAggregator, MinAggregator};
pub use percentile::PercentileAggregator;
pub use registry::{AggregateFactory, AggregateRegistry};
pub use stddev::StandardDeviationAggregator;
pub use sum::SumAggregator;

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(name: &str, values: &[f64]) -> Box<dyn AggregateFunction> {
        let mut acc = AggregateRegistry::with_defaults().resolve(name).unwrap()();
        acc.add_values(values).unwrap();
        acc
    }

    #[test]
    fn test_multiple_aggregators_together() {
        let data = [10.0, 20.0, 30.0, 40.0, 50.0];

        assert_eq!(fold("count", &data).compute().unwrap(), 5.0);
        assert_eq!(fold("sum", &data).compute().unwrap(), 150.0);
        assert_eq!(fold("avg", &data).compute().unwrap(), 30.0);
        assert_eq!(fold("min", &data).compute().unwrap(), 10.0);
        assert_eq!(fold("max", &data).compute().unwrap(), 50.0);
        assert_eq!(fold("median", &data).compute().unwrap(), 30.0);
    }

    #[test]
    fn test_merge_equals_union_for_every_builtin() {
        let left = [3.0, 1.0, 4.0, 1.0, 5.0];
        let right = [9.0, 2.0, 6.0];
        let union: Vec<f64> = left.iter().chain(right.iter()).copied().collect();

        let registry = AggregateRegistry::with_defaults();
        for name in registry.names() {
            let mut merged = fold(name, &left);
            merged.merge(fold(name, &right).as_ref()).unwrap();

            let single = fold(name, &union);
            let (a, b) = (merged.compute().unwrap(), single.compute().unwrap());
            assert!((a - b).abs() < 1e-9, "{}: merged {} != single {}", name, a, b);
            assert_eq!(merged.count(), single.count(), "{}", name);
        }
    }
}
