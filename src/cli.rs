use clap::Parser;
use std::path::PathBuf;

use cardbench::config::BenchConfig;
use cardbench::util::units::parse_bytes;

#[derive(Parser, Debug)]
#[command(name = "cardbench")]
#[command(about = "Storage card smoke test and sequential throughput benchmark", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory the card is mounted at
    #[arg(short, long)]
    pub mount_point: Option<PathBuf>,

    /// Transfer buffer size, e.g. 128KiB
    #[arg(short, long, value_parser = parse_bytes)]
    pub buffer_size: Option<u64>,

    /// Test file size, e.g. 4MiB
    #[arg(short, long, value_parser = parse_bytes)]
    pub file_size: Option<u64>,

    /// Bypass the page cache for the read test
    #[arg(long)]
    pub direct_io: bool,

    /// Create the volume if it cannot be mounted
    #[arg(long)]
    pub format_if_mount_failed: bool,

    /// Leave the speed test file on the card
    #[arg(long)]
    pub keep_test_file: bool,

    /// Name reported for the card
    #[arg(long)]
    pub device_name: Option<String>,

    /// Output the run report in JSON format
    #[arg(long)]
    pub json: bool,

    /// Save the effective configuration before running
    #[arg(long)]
    pub save_config: bool,
}

impl Cli {
    /// Layer command-line overrides on top of a loaded configuration
    pub fn apply(&self, mut config: BenchConfig) -> BenchConfig {
        if let Some(path) = &self.mount_point {
            config = config.with_mount_point(path.clone());
        }
        if let Some(size) = self.buffer_size {
            config = config.with_buffer_size(size);
        }
        if let Some(size) = self.file_size {
            config = config.with_file_size(size);
        }
        if self.direct_io {
            config = config.with_direct_io(true);
        }
        if self.format_if_mount_failed {
            config = config.with_format_if_mount_failed(true);
        }
        if self.keep_test_file {
            config = config.with_keep_test_file(true);
        }
        if let Some(name) = &self.device_name {
            config = config.with_device_name(name.clone());
        }
        config
    }
}
