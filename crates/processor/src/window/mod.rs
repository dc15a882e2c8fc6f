//! Windowing module for stream processing
//!
//! Windows are half-open event-time intervals `[start, end)`. Three
//! policies are supported:
//!
//! # Window Types
//!
//! ## Tumbling Windows
//! Fixed-size, non-overlapping windows. Each event belongs to exactly one window.
//!
//! ```text
//! Time:     0----5----10---15---20---25---30
//! Windows:  [----][----][----][----][----]
//! ```
//!
//! ## Hopping Windows
//! Fixed-size windows starting every `advance`. With `advance < size` events
//! belong to several overlapping windows; with `advance == size` this is a
//! tumbling window.
//!
//! ```text
//! Time:     0----5----10---15---20---25---30
//! Windows:  [----------]
//!                [----------]
//!                     [----------]
//! ```
//!
//! ## Session Windows
//! Variable-size windows closed by a period of key inactivity. Boundaries
//! depend on the data, not on a fixed grid.
//!
//! ```text
//! Time:     0-2--5----------12-14----20
//! Sessions: [----]           [---]   [-]
//! Gap:           ^^^^^^^^^^^^     ^^^^
//! ```
//!
//! # Example Usage
//!
//! ```rust
//! use processor::window::{assigner_for, WindowAssigner};
//! use metricflow_types::WindowSpec;
//! use std::time::Duration;
//!
//! let hopping = assigner_for(&WindowSpec::hopping(
//!     Duration::from_secs(600),
//!     Duration::from_secs(60),
//! ))
//! .unwrap();
//! assert_eq!(hopping.assign_windows(1_000).unwrap().len(), 10);
//! ```

pub mod assigner;
pub mod types;

pub use assigner::{
    assigner_for, HoppingWindowAssigner, SessionWindowAssigner, TumblingWindowAssigner,
    WindowAssigner,
};
pub use types::{datetime_from_millis, WindowBounds};
