//! cardbench - storage card throughput bench
//!
//! Measures sustained sequential write/read throughput of a mounted storage
//! volume through its file interface, and runs a write/rename/read-back
//! smoke test before the speed tests.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub mod bench;
pub mod config;
pub mod diag;
pub mod io;
pub mod models;
pub mod run;
pub mod util;

use bench::transfer::PartialTransfer;
use io::buffer::AllocationError;
use io::file::OpenMode;
use io::mount::MountError;

// Common error types
#[derive(Debug)]
pub enum CardBenchError {
    /// Transfer buffer could not be reserved
    Allocation(AllocationError),
    /// Volume could not be mounted
    Mount(MountError),
    /// File could not be opened in the required mode
    Open {
        path: PathBuf,
        mode: OpenMode,
        source: std::io::Error,
    },
    /// A chunk moved fewer bytes than requested
    PartialTransfer(PartialTransfer),
    /// Flush or sync of written data failed
    Durability {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Rename of a file failed
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    /// Elapsed time was too small to compute a throughput
    ImmeasurableTiming { bytes: u64, elapsed: Duration },
    /// Smoke test read back something other than what it wrote
    SmokeMismatch { expected: String, actual: String },
    /// Configuration validation or parsing error
    Config(String),
    /// Any other I/O failure
    Io(std::io::Error),
}

impl fmt::Display for CardBenchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardBenchError::Allocation(err) => write!(f, "Allocation error: {}", err),
            CardBenchError::Mount(err) => write!(f, "Mount error: {}", err),
            CardBenchError::Open { path, mode, source } => write!(
                f,
                "Failed to open {} for {}: {}",
                path.display(),
                mode.description(),
                source
            ),
            CardBenchError::PartialTransfer(partial) => write!(f, "Partial transfer: {}", partial),
            CardBenchError::Durability { path, source } => {
                write!(f, "Failed to sync {} to the device: {}", path.display(), source)
            }
            CardBenchError::Rename { from, to, source } => write!(
                f,
                "Failed to rename {} to {}: {}",
                from.display(),
                to.display(),
                source
            ),
            CardBenchError::ImmeasurableTiming { bytes, elapsed } => write!(
                f,
                "Timing not measurable: {} bytes in {:?}",
                bytes, elapsed
            ),
            CardBenchError::SmokeMismatch { expected, actual } => write!(
                f,
                "Smoke test mismatch: wrote '{}', read back '{}'",
                expected, actual
            ),
            CardBenchError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CardBenchError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for CardBenchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CardBenchError::Open { source, .. }
            | CardBenchError::Durability { source, .. }
            | CardBenchError::Rename { source, .. } => Some(source),
            CardBenchError::PartialTransfer(partial) => partial.io_source(),
            CardBenchError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CardBenchError {
    fn from(err: std::io::Error) -> Self {
        CardBenchError::Io(err)
    }
}

impl From<AllocationError> for CardBenchError {
    fn from(err: AllocationError) -> Self {
        CardBenchError::Allocation(err)
    }
}

impl From<MountError> for CardBenchError {
    fn from(err: MountError) -> Self {
        CardBenchError::Mount(err)
    }
}

impl From<PartialTransfer> for CardBenchError {
    fn from(partial: PartialTransfer) -> Self {
        CardBenchError::PartialTransfer(partial)
    }
}

impl From<serde_json::Error> for CardBenchError {
    fn from(err: serde_json::Error) -> Self {
        CardBenchError::Config(format!("JSON serialization error: {}", err))
    }
}

impl From<toml::de::Error> for CardBenchError {
    fn from(err: toml::de::Error) -> Self {
        CardBenchError::Config(format!("TOML parsing error: {}", err))
    }
}

impl From<toml::ser::Error> for CardBenchError {
    fn from(err: toml::ser::Error) -> Self {
        CardBenchError::Config(format!("TOML serialization error: {}", err))
    }
}

/// Result type alias for cardbench operations
pub type Result<T> = std::result::Result<T, CardBenchError>;

/// Error handling utilities
pub mod error {
    use super::CardBenchError;
    use crate::bench::transfer::TransferCause;
    use crate::io::buffer::AllocationError;
    use crate::io::mount::MountError;

    /// Convert error to user-friendly message with suggestions
    pub fn user_friendly_message(error: &CardBenchError) -> String {
        match error {
            CardBenchError::Mount(MountError::FormatFailure(_)) => {
                "Failed to mount filesystem. If you want the card to be formatted, \
                 enable format_if_mount_failed."
                    .to_string()
            }
            CardBenchError::Mount(MountError::DeviceInitFailure(msg)) => format!(
                "Failed to initialize the card ({}). Make sure the card is inserted \
                 and the data lines have pull-up resistors in place.",
                msg
            ),
            CardBenchError::Allocation(AllocationError::Alignment { .. }) => {
                "Could not reserve a DMA-capable buffer. Use a power-of-two alignment \
                 or a smaller buffer size."
                    .to_string()
            }
            CardBenchError::Allocation(_) => {
                "Failed to allocate the transfer buffer. Choose a smaller buffer size."
                    .to_string()
            }
            CardBenchError::PartialTransfer(partial) => match partial.cause {
                TransferCause::EndOfData => format!(
                    "The file ended early after {} bytes. Was the write test interrupted?",
                    partial.bytes_so_far
                ),
                TransferCause::DeviceError(_) => format!(
                    "The device reported an error after {} bytes. Check free space and the card.",
                    partial.bytes_so_far
                ),
            },
            CardBenchError::ImmeasurableTiming { .. } => {
                "The transfer finished too quickly to time. Increase the file size.".to_string()
            }
            CardBenchError::Config(msg) => {
                format!("Configuration error: {}. Check your settings.", msg)
            }
            _ => error.to_string(),
        }
    }
}

// Common types and constants
pub const APP_NAME: &str = "cardbench";
pub const CONFIG_FILE: &str = "cardbench.toml";
/// Diagnostics tag used by the core components
pub const TAG: &str = "cardbench";
