//! Monotonic timing and throughput computation

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::bench::transfer::TransferOp;
use crate::{CardBenchError, Result};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Monotonic start sample for one transfer session
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    /// Sample the clock; call immediately before the first chunk
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Sample the clock again and compute the speed for `bytes`
    pub fn stop(&self, bytes: u64) -> Result<SpeedResult> {
        SpeedResult::measure(bytes, self.elapsed())
    }
}

/// Throughput of one completed session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedResult {
    pub bytes: u64,
    pub elapsed_seconds: f64,
    pub throughput_mb_s: f64,
}

impl SpeedResult {
    /// Compute throughput in MB/s (1 MB = 1048576 bytes).
    ///
    /// A zero elapsed time cannot be divided by and is reported as
    /// [`CardBenchError::ImmeasurableTiming`].
    pub fn measure(bytes: u64, elapsed: Duration) -> Result<Self> {
        let elapsed_seconds = elapsed.as_secs_f64();
        if elapsed_seconds <= 0.0 {
            return Err(CardBenchError::ImmeasurableTiming { bytes, elapsed });
        }

        Ok(Self {
            bytes,
            elapsed_seconds,
            throughput_mb_s: (bytes as f64 / BYTES_PER_MB) / elapsed_seconds,
        })
    }

    /// Pair the result with its operation for reporting
    pub fn report(self, op: TransferOp) -> SpeedReport {
        SpeedReport { op, speed: self }
    }
}

/// A speed result labelled with its operation
///
/// Displays as `Write speed: X.XX MB/s (Y.YY seconds for Z bytes)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedReport {
    pub op: TransferOp,
    #[serde(flatten)]
    pub speed: SpeedResult,
}

impl fmt::Display for SpeedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} speed: {:.2} MB/s ({:.2} seconds for {} bytes)",
            self.op, self.speed.throughput_mb_s, self.speed.elapsed_seconds, self.speed.bytes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput_calculation() {
        let result = SpeedResult::measure(4194304, Duration::from_secs(2)).unwrap();
        assert_eq!(result.bytes, 4194304);
        assert!((result.elapsed_seconds - 2.0).abs() < 1e-9);
        assert!((result.throughput_mb_s - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_fractional_elapsed() {
        let result = SpeedResult::measure(1048576, Duration::from_millis(250)).unwrap();
        assert!((result.throughput_mb_s - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_elapsed_is_immeasurable() {
        let err = SpeedResult::measure(4096, Duration::ZERO).unwrap_err();
        match err {
            CardBenchError::ImmeasurableTiming { bytes, elapsed } => {
                assert_eq!(bytes, 4096);
                assert_eq!(elapsed, Duration::ZERO);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_smallest_positive_elapsed_is_finite() {
        let result = SpeedResult::measure(u64::MAX, Duration::from_nanos(1)).unwrap();
        assert!(result.elapsed_seconds > 0.0);
        assert!(result.throughput_mb_s.is_finite());
        assert!(result.throughput_mb_s > 0.0);
    }

    #[test]
    fn test_stopwatch_is_monotonic() {
        let watch = Stopwatch::start();
        std::thread::sleep(Duration::from_millis(5));
        let result = watch.stop(1048576).unwrap();
        assert!(result.elapsed_seconds >= 0.005);
        assert!(result.throughput_mb_s > 0.0);
        assert!(result.throughput_mb_s.is_finite());
    }

    #[test]
    fn test_report_line_format() {
        let report = SpeedResult::measure(4194304, Duration::from_millis(2500))
            .unwrap()
            .report(TransferOp::Write);
        assert_eq!(
            report.to_string(),
            "Write speed: 1.60 MB/s (2.50 seconds for 4194304 bytes)"
        );

        let report = SpeedResult::measure(1048576, Duration::from_secs(1))
            .unwrap()
            .report(TransferOp::Read);
        assert_eq!(
            report.to_string(),
            "Read speed: 1.00 MB/s (1.00 seconds for 1048576 bytes)"
        );
    }
}
