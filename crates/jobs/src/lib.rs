// crates/jobs/src/lib.rs
//! Generic background-job engine for kabu-view.
//!
//! One [`JobRegistry`] tracks all jobs of a single kind (market sync,
//! dataset build, ...) and enforces the single-active-job invariant.
//! A [`JobRunner`] bridges a pending job to a terminal state: it spawns
//! the async body, arms a timeout, watches for stalls and translates the
//! body's outcome into exactly one terminal registry transition.

pub mod error;
pub mod executor;
pub mod progress;
pub mod registry;
pub mod runner;
pub mod types;

pub use error::*;
pub use executor::*;
pub use progress::*;
pub use registry::*;
pub use runner::*;
pub use types::*;
