//! Whole-run orchestration
//!
//! mount → smoke test → write test → read test → delete test file → unmount.
//! The volume is held by a [`MountGuard`] so it is released exactly once
//! however the run ends.

use std::time::Instant;

use chrono::Utc;

use crate::bench::{SequentialBenchmark, SmokeTest};
use crate::config::BenchConfig;
use crate::diag::DiagnosticsSink;
use crate::error::user_friendly_message;
use crate::io::file::FileLifecycle;
use crate::io::mount::{MountGuard, MountService, Volume};
use crate::models::{PhaseOutcome, RunReport};
use crate::{Result, TAG};

/// Run every phase against the volume mounted at `config.mount_point`.
///
/// Only an invalid configuration or a failed mount is returned as an error;
/// phase failures are recorded in the report.
pub fn run_benchmark<M: MountService + ?Sized>(
    config: &BenchConfig,
    mount: &mut M,
    sink: &dyn DiagnosticsSink,
) -> Result<RunReport> {
    config.validate()?;
    let timestamp = Utc::now();
    let started = Instant::now();

    let guard = match MountGuard::mount(mount, &config.mount_point, &config.mount, sink) {
        Ok(guard) => guard,
        Err(e) => {
            sink.error(TAG, format_args!("{}", e));
            return Err(e.into());
        }
    };
    let volume = guard.volume().clone();
    sink.info(TAG, format_args!("Filesystem mounted"));
    describe_volume(&volume, sink);

    let files = FileLifecycle::new(config.mount.max_files).with_direct_io(config.direct_io);

    let smoke = phase(
        "Smoke test",
        SmokeTest::new(&files, sink)
            .with_line_capacity(config.line_capacity)
            .run(
                &volume.path(&config.smoke_source),
                &volume.path(&config.smoke_target),
                &volume.device_name,
            ),
        sink,
    );

    let (write, read) = if smoke.is_completed() {
        let bench = SequentialBenchmark::new(config, &files, sink);
        let write = phase("Write test", bench.run_write(&volume), sink);
        let read = if write.is_failed() {
            PhaseOutcome::skipped("write test failed")
        } else {
            phase("Read test", bench.run_read(&volume), sink)
        };
        (write, read)
    } else {
        (
            PhaseOutcome::skipped("smoke test failed"),
            PhaseOutcome::skipped("smoke test failed"),
        )
    };

    let test_file_deleted = if write.is_skipped() || config.keep_test_file {
        false
    } else {
        delete_test_file(&files, &volume, config, write.is_failed(), sink)
    };

    let unmounted = guard.release().is_ok();

    Ok(RunReport {
        timestamp,
        device_name: volume.device_name.clone(),
        mount_point: volume.mount_point.display().to_string(),
        formatted: volume.formatted,
        config: config.clone(),
        smoke,
        write,
        read,
        test_file_deleted,
        unmounted,
        duration: started.elapsed(),
    })
}

fn describe_volume(volume: &Volume, sink: &dyn DiagnosticsSink) {
    sink.info(
        TAG,
        format_args!(
            "Name: {}, mounted at {}{}",
            volume.device_name,
            volume.mount_point.display(),
            if volume.formatted { " (freshly formatted)" } else { "" }
        ),
    );
}

/// Log and classify a phase result
fn phase<T>(
    name: &str,
    result: Result<T>,
    sink: &dyn DiagnosticsSink,
) -> PhaseOutcome<T> {
    if let Err(e) = &result {
        sink.error(TAG, format_args!("{} failed: {}", name, e));
        let hint = user_friendly_message(e);
        if hint != e.to_string() {
            sink.info(TAG, format_args!("{}", hint));
        }
    }
    let outcome = PhaseOutcome::from_result(result);
    if let PhaseOutcome::Immeasurable { bytes, .. } = &outcome {
        sink.warn(
            TAG,
            format_args!("{}: {} bytes moved too quickly to measure a speed", name, bytes),
        );
    }
    outcome
}

/// A failed write may or may not have left a file behind
fn delete_test_file(
    files: &FileLifecycle,
    volume: &Volume,
    config: &BenchConfig,
    write_failed: bool,
    sink: &dyn DiagnosticsSink,
) -> bool {
    let path = volume.path(&config.test_file);
    let result = if write_failed {
        files.ensure_absent(&path)
    } else {
        files.delete(&path).map(|()| true)
    };

    match result {
        Ok(removed) => {
            if removed {
                sink.info(TAG, format_args!("Deleted {}", path.display()));
            }
            removed
        }
        Err(e) => {
            sink.warn(TAG, format_args!("Failed to delete {}: {}", path.display(), e));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::{Level, RecordingSink};
    use crate::io::mount::{DirectoryMount, MountError, MountOptions};
    use crate::CardBenchError;
    use std::fs;
    use std::io;
    use std::path::Path;
    use tempfile::tempdir;

    /// Directory mount that counts mount/unmount calls
    #[derive(Default)]
    struct CountingMount {
        inner: DirectoryMount,
        mounts: usize,
        unmounts: usize,
    }

    impl MountService for CountingMount {
        fn mount(&mut self, mount_point: &Path, options: &MountOptions) -> std::result::Result<Volume, MountError> {
            let volume = self.inner.mount(mount_point, options)?;
            self.mounts += 1;
            Ok(volume)
        }

        fn unmount(&mut self, volume: Volume) -> io::Result<()> {
            self.unmounts += 1;
            self.inner.unmount(volume)
        }
    }

    fn small_config(mount_point: &Path) -> BenchConfig {
        BenchConfig::default()
            .with_mount_point(mount_point.to_path_buf())
            .with_file_size(512 * 1024)
            .with_buffer_size(64 * 1024)
            .with_device_name("SD64G")
    }

    #[test]
    fn test_full_run() {
        let dir = tempdir().unwrap();
        let config = small_config(dir.path());
        let sink = RecordingSink::new();
        let mut mount = CountingMount::default();

        let report = run_benchmark(&config, &mut mount, &sink).unwrap();

        assert_eq!(report.smoke.completed().map(String::as_str), Some("Hello SD64G!"));
        assert_eq!(report.write.completed().unwrap().speed.bytes, 512 * 1024);
        assert_eq!(report.read.completed().unwrap().speed.bytes, 512 * 1024);
        assert!(report.test_file_deleted);
        assert!(report.unmounted);
        assert!(report.succeeded());
        assert_eq!(report.device_name, "SD64G");

        assert_eq!((mount.mounts, mount.unmounts), (1, 1));
        assert!(!dir.path().join("test.txt").exists());
        assert!(!dir.path().join("hello.txt").exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("foo.txt")).unwrap(),
            "Hello SD64G!\n"
        );

        let messages: Vec<String> = sink.lines().into_iter().map(|l| l.message).collect();
        let position = |needle: &str| {
            messages
                .iter()
                .position(|m| m.contains(needle))
                .unwrap_or_else(|| panic!("missing log line: {}", needle))
        };
        assert!(position("Filesystem mounted") < position("Read from file:"));
        assert!(position("Read from file:") < position("Write speed:"));
        assert!(position("Write speed:") < position("Read speed:"));
        assert!(position("Read speed:") < position("Card unmounted"));
    }

    #[test]
    fn test_keep_test_file() {
        let dir = tempdir().unwrap();
        let config = small_config(dir.path()).with_keep_test_file(true);
        let sink = RecordingSink::new();
        let mut mount = CountingMount::default();

        let report = run_benchmark(&config, &mut mount, &sink).unwrap();
        assert!(report.succeeded());
        assert!(!report.test_file_deleted);
        assert_eq!(fs::metadata(dir.path().join("test.txt")).unwrap().len(), 512 * 1024);
    }

    #[test]
    fn test_mount_failure_aborts_without_unmount() {
        let dir = tempdir().unwrap();
        let config = small_config(&dir.path().join("absent"));
        let sink = RecordingSink::new();
        let mut mount = CountingMount::default();

        let err = run_benchmark(&config, &mut mount, &sink).unwrap_err();
        assert!(matches!(err, CardBenchError::Mount(MountError::FormatFailure(_))));
        assert_eq!((mount.mounts, mount.unmounts), (0, 0));
        assert!(sink.contains(Level::Error, "failed to mount filesystem"));
    }

    #[test]
    fn test_format_if_mount_failed_creates_volume() {
        let dir = tempdir().unwrap();
        let config = small_config(&dir.path().join("absent")).with_format_if_mount_failed(true);
        let sink = RecordingSink::new();
        let mut mount = CountingMount::default();

        let report = run_benchmark(&config, &mut mount, &sink).unwrap();
        assert!(report.formatted);
        assert!(report.succeeded());
        assert!(sink.contains(Level::Info, "freshly formatted"));
    }

    #[test]
    fn test_invalid_config_never_mounts() {
        let dir = tempdir().unwrap();
        let config = small_config(dir.path()).with_buffer_size(0);
        let sink = RecordingSink::new();
        let mut mount = CountingMount::default();

        let err = run_benchmark(&config, &mut mount, &sink).unwrap_err();
        assert!(matches!(err, CardBenchError::Config(_)));
        assert_eq!(mount.mounts, 0);
    }

    #[test]
    fn test_smoke_failure_skips_speed_tests_and_unmounts() {
        let dir = tempdir().unwrap();
        // A directory where the rename target should go cannot be cleared
        fs::create_dir(dir.path().join("foo.txt")).unwrap();
        let config = small_config(dir.path());
        let sink = RecordingSink::new();
        let mut mount = CountingMount::default();

        let report = run_benchmark(&config, &mut mount, &sink).unwrap();
        assert!(report.smoke.is_failed());
        assert!(report.write.is_skipped());
        assert!(report.read.is_skipped());
        assert!(!report.test_file_deleted);
        assert!(!report.succeeded());
        assert_eq!(mount.unmounts, 1);
        assert!(!dir.path().join("test.txt").exists());
        assert!(sink.contains(Level::Error, "Smoke test failed"));
    }

    #[test]
    fn test_write_failure_skips_read_and_unmounts() {
        let dir = tempdir().unwrap();
        let mut config = small_config(dir.path());
        config.test_file = "no_such_dir/test.txt".to_string();
        let sink = RecordingSink::new();
        let mut mount = CountingMount::default();

        let report = run_benchmark(&config, &mut mount, &sink).unwrap();
        assert!(report.smoke.is_completed());
        assert!(report.write.is_failed());
        assert!(matches!(&report.read, PhaseOutcome::Skipped { reason } if reason.contains("write")));
        assert!(!report.test_file_deleted);
        assert!(report.unmounted);
        assert_eq!(mount.unmounts, 1);
        assert!(sink.contains(Level::Error, "Write test failed"));
    }
}
