//! Data models module
//!
//! Serializable records of a benchmark run.

pub mod result;

pub use result::{PhaseOutcome, RunReport};
