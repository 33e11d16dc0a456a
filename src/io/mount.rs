//! Storage mount seam
//!
//! Bringing the device up and mounting its filesystem is owned by a
//! [`MountService`]. The benchmark only holds the mounted [`Volume`] through a
//! [`MountGuard`], which unmounts exactly once on every exit path.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::diag::DiagnosticsSink;
use crate::TAG;

/// Options handed to the mount service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountOptions {
    /// Recreate the filesystem when it cannot be mounted
    pub format_if_mount_failed: bool,
    /// Maximum number of simultaneously open files
    pub max_files: usize,
    /// Identity reported for the device; derived from the mount point if unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            format_if_mount_failed: false,
            max_files: 5,
            device_name: None,
        }
    }
}

/// Mount failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountError {
    /// No usable filesystem; reformatting could recover it
    FormatFailure(String),
    /// The device or its transport could not be brought up
    DeviceInitFailure(String),
}

impl fmt::Display for MountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountError::FormatFailure(msg) => write!(f, "failed to mount filesystem: {}", msg),
            MountError::DeviceInitFailure(msg) => {
                write!(f, "failed to initialize the device: {}", msg)
            }
        }
    }
}

impl std::error::Error for MountError {}

/// A mounted volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub mount_point: PathBuf,
    pub device_name: String,
    /// Set when the mount had to create a fresh filesystem
    pub formatted: bool,
}

impl Volume {
    /// Path of `name` on this volume
    pub fn path(&self, name: &str) -> PathBuf {
        self.mount_point.join(name)
    }
}

/// Brings a storage device up and mounts it
pub trait MountService {
    fn mount(&mut self, mount_point: &Path, options: &MountOptions) -> Result<Volume, MountError>;

    /// Release a mounted volume. Calling this twice for one mount is not
    /// supported; go through [`MountGuard`].
    fn unmount(&mut self, volume: Volume) -> io::Result<()>;
}

/// Mount service backed by a directory on the host filesystem
///
/// "Formatting" creates the directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryMount;

impl DirectoryMount {
    pub fn new() -> Self {
        Self
    }
}

impl MountService for DirectoryMount {
    fn mount(&mut self, mount_point: &Path, options: &MountOptions) -> Result<Volume, MountError> {
        let mut formatted = false;
        match fs::metadata(mount_point) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(MountError::DeviceInitFailure(format!(
                    "{} is not a directory",
                    mount_point.display()
                )))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if !options.format_if_mount_failed {
                    return Err(MountError::FormatFailure(format!(
                        "no filesystem at {}",
                        mount_point.display()
                    )));
                }
                fs::create_dir_all(mount_point).map_err(|e| {
                    MountError::FormatFailure(format!(
                        "cannot create {}: {}",
                        mount_point.display(),
                        e
                    ))
                })?;
                formatted = true;
            }
            Err(e) => {
                return Err(MountError::DeviceInitFailure(format!(
                    "{}: {}",
                    mount_point.display(),
                    e
                )))
            }
        }

        let device_name = options.device_name.clone().unwrap_or_else(|| {
            mount_point
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "card".to_string())
        });

        Ok(Volume {
            mount_point: mount_point.to_path_buf(),
            device_name,
            formatted,
        })
    }

    fn unmount(&mut self, _volume: Volume) -> io::Result<()> {
        Ok(())
    }
}

/// Holds a mounted volume and unmounts it when released or dropped
pub struct MountGuard<'a, M: MountService + ?Sized> {
    service: &'a mut M,
    volume: Volume,
    mounted: bool,
    sink: &'a dyn DiagnosticsSink,
}

impl<'a, M: MountService + ?Sized> MountGuard<'a, M> {
    /// Mount through `service`; nothing is held if mounting fails
    pub fn mount(
        service: &'a mut M,
        mount_point: &Path,
        options: &MountOptions,
        sink: &'a dyn DiagnosticsSink,
    ) -> Result<Self, MountError> {
        let volume = service.mount(mount_point, options)?;
        Ok(Self {
            service,
            volume,
            mounted: true,
            sink,
        })
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    /// Unmount now and report the outcome
    pub fn release(mut self) -> io::Result<()> {
        self.unmount_once()
    }

    fn unmount_once(&mut self) -> io::Result<()> {
        if !self.mounted {
            return Ok(());
        }
        self.mounted = false;

        let result = self.service.unmount(self.volume.clone());
        match &result {
            Ok(()) => self.sink.info(TAG, format_args!("Card unmounted")),
            Err(e) => self.sink.error(
                TAG,
                format_args!("Failed to unmount {}: {}", self.volume.mount_point.display(), e),
            ),
        }
        result
    }
}

impl<M: MountService + ?Sized> Drop for MountGuard<'_, M> {
    fn drop(&mut self) {
        let _ = self.unmount_once();
    }
}
