//! Run result data models
//!
//! A [`RunReport`] records what each phase of one run produced. It is
//! printed or serialized to JSON, never persisted.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bench::timing::SpeedReport;
use crate::config::BenchConfig;
use crate::CardBenchError;

/// How one phase of a run ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PhaseOutcome<T> {
    Completed { result: T },
    /// The transfer finished but took too little time to yield a throughput
    Immeasurable { bytes: u64, elapsed_seconds: f64 },
    Failed { error: String },
    Skipped { reason: String },
}

impl<T> PhaseOutcome<T> {
    /// Classify a phase result; immeasurable timing is not a failure
    pub fn from_result(result: Result<T, CardBenchError>) -> Self {
        match result {
            Ok(result) => PhaseOutcome::Completed { result },
            Err(CardBenchError::ImmeasurableTiming { bytes, elapsed }) => {
                PhaseOutcome::Immeasurable {
                    bytes,
                    elapsed_seconds: elapsed.as_secs_f64(),
                }
            }
            Err(e) => PhaseOutcome::Failed {
                error: e.to_string(),
            },
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        PhaseOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn completed(&self) -> Option<&T> {
        match self {
            PhaseOutcome::Completed { result } => Some(result),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, PhaseOutcome::Completed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PhaseOutcome::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, PhaseOutcome::Skipped { .. })
    }
}

impl<T: fmt::Display> fmt::Display for PhaseOutcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseOutcome::Completed { result } => write!(f, "{}", result),
            PhaseOutcome::Immeasurable { bytes, .. } => {
                write!(f, "immeasurable ({} bytes in too short a time)", bytes)
            }
            PhaseOutcome::Failed { error } => write!(f, "failed: {}", error),
            PhaseOutcome::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}

/// Complete record of one benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// When the run started
    pub timestamp: DateTime<Utc>,
    pub device_name: String,
    pub mount_point: String,
    /// The mount created a fresh filesystem
    pub formatted: bool,
    pub config: BenchConfig,
    /// Line read back by the smoke test
    pub smoke: PhaseOutcome<String>,
    pub write: PhaseOutcome<SpeedReport>,
    pub read: PhaseOutcome<SpeedReport>,
    pub test_file_deleted: bool,
    pub unmounted: bool,
    /// Wall time of the whole run
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl RunReport {
    /// True if no phase failed or was skipped and the volume was released
    pub fn succeeded(&self) -> bool {
        let failed_or_skipped = self.smoke.is_failed()
            || self.smoke.is_skipped()
            || self.write.is_failed()
            || self.write.is_skipped()
            || self.read.is_failed()
            || self.read.is_skipped();
        !failed_or_skipped && self.unmounted
    }

    /// Human-readable multi-line summary
    pub fn summary(&self) -> String {
        format!(
            "{} - {} at {}\n  Smoke test: {}\n  {}\n  {}\n  Completed in {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.device_name,
            self.mount_point,
            self.smoke,
            phase_line("Write", &self.write),
            phase_line("Read", &self.read),
            crate::util::units::format_duration(self.duration),
        )
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn phase_line(name: &str, outcome: &PhaseOutcome<SpeedReport>) -> String {
    match outcome {
        // SpeedReport already names its operation
        PhaseOutcome::Completed { result } => result.to_string(),
        other => format!("{} test: {}", name, other),
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
