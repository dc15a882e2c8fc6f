//! Pipeline wiring
//!
//! A [`MetricPipeline`] is the validated, resolved form of one process
//! definition. [`PipelineExecutor`] feeds it from the bus, one
//! [`PartitionWorker`] per source partition, and [`Runtime`] runs every
//! configured pipeline next to the error pipeline and the metrics endpoint.
//!
//! ```text
//! record -> transformations -> filter/key -> window -> (join) -> having -> sinks
//! ```

mod builder;
mod executor;
mod runtime;
mod worker;

pub use builder::{MetricPipeline, PipelineBuilder, DEFAULT_WORKER_CAPACITY};
pub use executor::PipelineExecutor;
pub use runtime::Runtime;
pub use worker::{PartitionWorker, WorkerInput};
