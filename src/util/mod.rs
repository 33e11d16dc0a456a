//! Utility functions module

pub mod units;

pub use units::{format_bytes, format_duration, parse_bytes};
