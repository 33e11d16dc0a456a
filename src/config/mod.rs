//! Configuration management module
//!
//! Holds the per-run benchmark parameters and loads/saves them as TOML.
//! A configuration is an immutable value handed to each component.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bench::smoke::DEFAULT_LINE_CAPACITY;
use crate::io::mount::MountOptions;
use crate::{CardBenchError, Result, APP_NAME, CONFIG_FILE};

/// Benchmark configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Where the storage volume is mounted
    pub mount_point: PathBuf,
    /// Speed test file name, relative to the mount point
    pub test_file: String,
    /// Smoke test file written first
    pub smoke_source: String,
    /// Name the smoke test file is renamed to
    pub smoke_target: String,
    /// Transfer buffer size, and so the largest chunk (in bytes)
    pub buffer_size: u64,
    /// Total bytes written and read back by the speed tests
    pub file_size: u64,
    /// Boundary the read buffer is placed on for DMA
    pub dma_alignment: usize,
    /// Bypass the page cache for the read test when the filesystem allows it
    pub direct_io: bool,
    /// Smoke test read-back capacity in bytes
    pub line_capacity: usize,
    /// Leave the speed test file on the volume afterwards
    pub keep_test_file: bool,
    pub mount: MountOptions,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            mount_point: std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("sdcard"),
            test_file: "test.txt".to_string(),
            smoke_source: "hello.txt".to_string(),
            smoke_target: "foo.txt".to_string(),
            buffer_size: 128 * 1024, // 128 KiB
            file_size: 4 * 1024 * 1024, // 4 MiB
            dma_alignment: 4096,
            direct_io: false,
            line_capacity: DEFAULT_LINE_CAPACITY,
            keep_test_file: false,
            mount: MountOptions::default(),
        }
    }
}

impl BenchConfig {
    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<()> {
        for (what, name) in [
            ("Test file", &self.test_file),
            ("Smoke source", &self.smoke_source),
            ("Smoke target", &self.smoke_target),
        ] {
            if name.trim().is_empty() {
                return Err(CardBenchError::Config(format!("{} name must not be empty", what)));
            }
        }

        if self.smoke_source == self.smoke_target
            || self.test_file == self.smoke_source
            || self.test_file == self.smoke_target
        {
            return Err(CardBenchError::Config(
                "Test file and smoke test file names must all differ".to_string(),
            ));
        }

        if self.buffer_size == 0 {
            return Err(CardBenchError::Config(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        const MAX_BUFFER_SIZE: u64 = 64 * 1024 * 1024; // 64 MiB
        if self.buffer_size > MAX_BUFFER_SIZE {
            return Err(CardBenchError::Config(format!(
                "Buffer size too large: {} bytes (max: {} bytes)",
                self.buffer_size, MAX_BUFFER_SIZE
            )));
        }

        if self.file_size == 0 {
            return Err(CardBenchError::Config(
                "File size must be greater than 0".to_string(),
            ));
        }

        const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024 * 1024; // 100 GiB
        if self.file_size > MAX_FILE_SIZE {
            return Err(CardBenchError::Config(format!(
                "File size too large: {} bytes (max: {} bytes)",
                self.file_size, MAX_FILE_SIZE
            )));
        }

        const MIN_LINE_CAPACITY: usize = 2;
        const MAX_LINE_CAPACITY: usize = 4096;
        if self.line_capacity < MIN_LINE_CAPACITY || self.line_capacity > MAX_LINE_CAPACITY {
            return Err(CardBenchError::Config(format!(
                "Line capacity must be between {} and {} bytes",
                MIN_LINE_CAPACITY, MAX_LINE_CAPACITY
            )));
        }

        if self.mount.max_files == 0 {
            return Err(CardBenchError::Config(
                "Max open files must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Buffer size as an in-memory length
    pub fn buffer_len(&self) -> Result<usize> {
        usize::try_from(self.buffer_size).map_err(|_| {
            CardBenchError::Config(format!(
                "Buffer size {} does not fit in memory",
                self.buffer_size
            ))
        })
    }

    pub fn with_mount_point(mut self, path: PathBuf) -> Self {
        self.mount_point = path;
        self
    }

    pub fn with_buffer_size(mut self, size: u64) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_file_size(mut self, size: u64) -> Self {
        self.file_size = size;
        self
    }

    pub fn with_dma_alignment(mut self, alignment: usize) -> Self {
        self.dma_alignment = alignment;
        self
    }

    pub fn with_direct_io(mut self, direct_io: bool) -> Self {
        self.direct_io = direct_io;
        self
    }

    pub fn with_line_capacity(mut self, capacity: usize) -> Self {
        self.line_capacity = capacity;
        self
    }

    pub fn with_keep_test_file(mut self, keep: bool) -> Self {
        self.keep_test_file = keep;
        self
    }

    pub fn with_format_if_mount_failed(mut self, format: bool) -> Self {
        self.mount.format_if_mount_failed = format;
        self
    }

    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.mount.device_name = Some(name.into());
        self
    }

    /// Load configuration from the standard config file location.
    /// Returns default configuration if the file doesn't exist.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;
        if !config_path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&config_path)
    }

    /// Load and validate configuration from `path`
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CardBenchError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            CardBenchError::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the standard config file location
    pub fn save(&self) -> Result<PathBuf> {
        let config_path = Self::config_file_path()?;
        self.save_to(&config_path)?;
        Ok(config_path)
    }

    /// Validate, then write configuration to `path` as TOML
    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CardBenchError::Config(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| {
            CardBenchError::Config(format!(
                "Failed to write config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(())
    }

    /// Standard configuration file path: `$CONFIG_HOME/cardbench/cardbench.toml`
    pub fn config_file_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            CardBenchError::Config("Unable to determine config directory".to_string())
        })?;

        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }
}
