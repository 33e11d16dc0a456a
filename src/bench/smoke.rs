//! Write / rename / read-back smoke test
//!
//! Writes one greeting line naming the device, renames the file over a
//! cleared target, reads the line back through a bounded buffer and checks it.

use std::path::Path;

use crate::diag::DiagnosticsSink;
use crate::io::file::{FileLifecycle, OpenMode};
use crate::{CardBenchError, Result, TAG};

/// Default read-back buffer size in bytes, terminator slot included
pub const DEFAULT_LINE_CAPACITY: usize = 64;

pub struct SmokeTest<'a> {
    files: &'a FileLifecycle,
    sink: &'a dyn DiagnosticsSink,
    line_capacity: usize,
}

impl<'a> SmokeTest<'a> {
    pub fn new(files: &'a FileLifecycle, sink: &'a dyn DiagnosticsSink) -> Self {
        Self {
            files,
            sink,
            line_capacity: DEFAULT_LINE_CAPACITY,
        }
    }

    /// Read-back buffer size; at most `capacity - 1` bytes come back
    pub fn with_line_capacity(mut self, capacity: usize) -> Self {
        self.line_capacity = capacity;
        self
    }

    /// Run the sequence and return the line read back, newline stripped
    pub fn run(&self, source: &Path, target: &Path, device_name: &str) -> Result<String> {
        let line = greeting(device_name);
        self.write_line(source, &line)?;

        self.files.ensure_absent(target)?;
        self.sink.info(
            TAG,
            format_args!("Renaming file {} to {}", source.display(), target.display()),
        );
        self.files.rename(source, target)?;

        let read_back = self.read_line(target)?;
        self.sink.info(TAG, format_args!("Read from file: '{}'", read_back));

        verify(&expected_readback(&line, self.line_capacity), &read_back)?;
        Ok(read_back)
    }

    fn write_line(&self, path: &Path, line: &str) -> Result<()> {
        self.sink.info(TAG, format_args!("Opening file {}", path.display()));
        let mut file = self.files.open(path, OpenMode::WriteTruncate)?;
        file.write_line(line)?;
        file.close()?;
        self.sink.info(TAG, format_args!("File written"));
        Ok(())
    }

    fn read_line(&self, path: &Path) -> Result<String> {
        self.sink.info(TAG, format_args!("Reading file {}", path.display()));
        let mut file = self.files.open(path, OpenMode::ReadOnly)?;
        let raw = file.read_line_bounded(self.line_capacity)?;
        file.close()?;
        Ok(strip_newline(&raw).to_string())
    }
}

/// The line written for a device
pub fn greeting(device_name: &str) -> String {
    format!("Hello {}!", device_name)
}

/// Remove exactly one trailing `\n`, if present
pub fn strip_newline(line: &str) -> &str {
    line.strip_suffix('\n').unwrap_or(line)
}

/// What a bounded read of `line` plus its newline should yield
fn expected_readback(line: &str, capacity: usize) -> String {
    let mut framed = line.as_bytes().to_vec();
    framed.push(b'\n');
    framed.truncate(capacity.saturating_sub(1));
    strip_newline(&String::from_utf8_lossy(&framed)).to_string()
}

fn verify(expected: &str, actual: &str) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(CardBenchError::SmokeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}
