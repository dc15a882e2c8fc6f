//! Name-based lookup of aggregate functions
//!
//! Pipelines name their aggregate function in configuration. The name is
//! resolved to a factory once, when the pipeline is built; every
//! (key, window) cell then calls the factory for a fresh accumulator.

use super::{
    AggregateFunction, AverageAggregator, CountAggregator, MaxAggregator, MinAggregator,
    PercentileAggregator, StandardDeviationAggregator, SumAggregator,
};
use crate::error::{AggregationError, AggregationResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Zero-argument initializer producing a fresh accumulator
pub type AggregateFactory = Arc<dyn Fn() -> Box<dyn AggregateFunction> + Send + Sync>;

/// Mapping from function name to accumulator factory
#[derive(Clone, Default)]
pub struct AggregateRegistry {
    factories: HashMap<String, AggregateFactory>,
}

impl AggregateRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in function
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register("count", || Box::new(CountAggregator::new()))
            .register("sum", || Box::new(SumAggregator::new()))
            .register("avg", || Box::new(AverageAggregator::new()))
            .register("min", || Box::new(MinAggregator::new()))
            .register("max", || Box::new(MaxAggregator::new()))
            .register("stddev", || Box::new(StandardDeviationAggregator::new()))
            .register("stddev_pop", || {
                Box::new(StandardDeviationAggregator::population())
            })
            .register("median", || Box::new(PercentileAggregator::median()))
            .register("p90", || Box::new(PercentileAggregator::p90()))
            .register("p95", || Box::new(PercentileAggregator::p95()))
            .register("p99", || Box::new(PercentileAggregator::p99()));
        registry
    }

    /// Register (or replace) a function under `name`
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn AggregateFunction> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.into().to_ascii_lowercase(), Arc::new(factory));
        self
    }

    /// Resolve a function name to its factory
    pub fn resolve(&self, name: &str) -> AggregationResult<AggregateFactory> {
        self.factories
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| AggregationError::UnknownFunction {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_ascii_lowercase())
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for AggregateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    #[test]
    fn test_defaults() {
        let registry = AggregateRegistry::with_defaults();
        for name in ["count", "sum", "avg", "min", "max", "stddev", "median", "p95", "p99"] {
            assert!(registry.contains(name), "missing {}", name);
        }
        assert_eq!(registry.names().first(), Some(&"avg"));
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let registry = AggregateRegistry::with_defaults();
        let factory = registry.resolve("SUM").unwrap();
        let mut acc = factory();
        acc.add_value(5.0).unwrap();
        acc.add_value(7.0).unwrap();
        assert_eq!(acc.compute().unwrap(), 12.0);
    }

    #[test]
    fn test_factory_produces_independent_instances() {
        let registry = AggregateRegistry::with_defaults();
        let factory = registry.resolve("count").unwrap();

        let mut first = factory();
        first.add_value(1.0).unwrap();
        let second = factory();

        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 0);
    }

    #[test]
    fn test_unknown_function() {
        let registry = AggregateRegistry::with_defaults();
        match registry.resolve("mode") {
            Err(AggregationError::UnknownFunction { name }) => assert_eq!(name, "mode"),
            other => panic!("expected unknown function, got {:?}", other.map(|_| ())),
        }
    }

    #[derive(Debug, Default)]
    struct LastValue {
        last: Option<f64>,
        count: u64,
    }

    impl AggregateFunction for LastValue {
        fn name(&self) -> &str {
            "last"
        }

        fn add_value(&mut self, value: f64) -> anyhow::Result<()> {
            self.last = Some(value);
            self.count += 1;
            Ok(())
        }

        fn merge(&mut self, other: &dyn AggregateFunction) -> anyhow::Result<()> {
            self.count += other.count();
            Ok(())
        }

        fn compute(&self) -> anyhow::Result<f64> {
            self.last.ok_or_else(|| anyhow::anyhow!("no value"))
        }

        fn count(&self) -> u64 {
            self.count
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = AggregateRegistry::new();
        registry.register("last", || Box::new(LastValue::default()));

        let mut acc = registry.resolve("last").unwrap()();
        acc.add_values(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(acc.compute().unwrap(), 3.0);
        assert_eq!(registry.names(), vec!["last"]);
    }
}
