//! Core data model for metricflow
//!
//! This crate holds the types shared by the configuration layer, the
//! processing engine and the command-line runner: records, grouping keys,
//! pipeline definitions and sink descriptors.

pub mod definitions;
pub mod errors;
pub mod keys;
pub mod records;
pub mod retention;
pub mod sinks;

pub use definitions::{
    AggregationSpec, Comparison, FieldPredicate, HavingSpec, JoinMode, JoinSpec, PredicateOp,
    ProcessDefinition, TransformationSpec, ValuePolicy, WindowSpec, DEFAULT_JOIN_WINDOW_MS, DEFAULT_PARTITION_FIELD,
};
pub use errors::{ModelError, Result};
pub use keys::Keys;
pub use records::{ErrorData, Record};
pub use retention::RetentionLevel;
pub use sinks::{SinkDescriptor, DEFAULT_TRAP_OID};
