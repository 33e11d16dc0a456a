//! Sequential benchmark operations
//!
//! The write test fills the test file from a heap buffer and syncs it; the
//! read test reads it back into a DMA-capable buffer. Each phase owns its
//! buffer for exactly the session and releases it on every exit path.

use crate::bench::timing::{SpeedReport, Stopwatch};
use crate::bench::transfer::{drive_read, drive_write, TransferOp};
use crate::config::BenchConfig;
use crate::diag::DiagnosticsSink;
use crate::io::buffer::{Alignment, TransferBuffer};
use crate::io::file::{FileLifecycle, OpenMode};
use crate::io::mount::Volume;
use crate::util::units::format_bytes;
use crate::{Result, TAG};

/// Sequential benchmark executor
pub struct SequentialBenchmark<'a> {
    config: &'a BenchConfig,
    files: &'a FileLifecycle,
    sink: &'a dyn DiagnosticsSink,
}

impl<'a> SequentialBenchmark<'a> {
    pub fn new(
        config: &'a BenchConfig,
        files: &'a FileLifecycle,
        sink: &'a dyn DiagnosticsSink,
    ) -> Self {
        Self {
            config,
            files,
            sink,
        }
    }

    /// Write `file_size` bytes of pattern data to the test file
    pub fn run_write(&self, volume: &Volume) -> Result<SpeedReport> {
        let path = volume.path(&self.config.test_file);
        self.sink.info(TAG, format_args!("Testing write speed..."));
        self.files.ensure_absent(&path)?;

        let mut buffer = TransferBuffer::allocate(self.config.buffer_len()?, Alignment::None)?;
        buffer.fill_pattern();

        self.sink.info(TAG, format_args!("Opening file for writing: {}", path.display()));
        let mut file = self.files.open(&path, OpenMode::WriteTruncate)?;

        let watch = Stopwatch::start();
        let session = drive_write(&mut file, &buffer, self.config.file_size, self.sink);
        let bytes = session.into_result(&path)?;
        let speed = watch.stop(bytes);
        file.close()?;

        let report = speed?.report(TransferOp::Write);
        self.sink.info(TAG, format_args!("{}", report));
        Ok(report)
    }

    /// Read `file_size` bytes of the test file back
    pub fn run_read(&self, volume: &Volume) -> Result<SpeedReport> {
        let path = volume.path(&self.config.test_file);
        self.sink.info(TAG, format_args!("Testing read speed..."));

        let mut buffer = TransferBuffer::allocate(
            self.config.buffer_len()?,
            Alignment::DmaCapable(self.config.dma_alignment),
        )?;

        self.sink.info(TAG, format_args!("Opening file for reading: {}", path.display()));
        let mut file = self.files.open(&path, OpenMode::ReadOnly)?;
        let opened_direct = file.is_direct();
        if opened_direct {
            self.sink.debug(TAG, format_args!("Reading with direct I/O"));
        }

        self.sink.debug(
            TAG,
            format_args!(
                "Reading {} in {} chunks",
                format_bytes(self.config.file_size),
                format_bytes(self.config.buffer_size)
            ),
        );
        let watch = Stopwatch::start();
        let session = drive_read(&mut file, &mut buffer, self.config.file_size, self.sink);
        if opened_direct && !file.is_direct() {
            self.sink.debug(
                TAG,
                format_args!("Direct I/O refused an unaligned chunk, continued buffered"),
            );
        }
        let bytes = session.into_result(&path)?;
        let speed = watch.stop(bytes);
        file.close()?;

        let report = speed?.report(TransferOp::Read);
        self.sink.info(TAG, format_args!("{}", report));
        Ok(report)
    }
}
