//! Benchmark engine module
//!
//! Chunked transfer driving, timing, the smoke test, and the sequential
//! write/read phases built from them.

pub mod sequential;
pub mod smoke;
pub mod timing;
pub mod transfer;

// Re-export commonly used types
pub use sequential::SequentialBenchmark;
pub use smoke::SmokeTest;
pub use timing::{SpeedReport, SpeedResult, Stopwatch};
pub use transfer::{
    drive_read, drive_write, PartialTransfer, SessionState, TransferCause, TransferOp,
    TransferSession,
};
