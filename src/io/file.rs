use std::cell::RefCell;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::bench::transfer::TransferCause;
use crate::{CardBenchError, Result};

/// How a test file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMode {
    /// Create or truncate, write only
    WriteTruncate,
    /// Existing file, read only
    ReadOnly,
}

impl OpenMode {
    pub fn description(&self) -> &'static str {
        match self {
            OpenMode::WriteTruncate => "writing",
            OpenMode::ReadOnly => "reading",
        }
    }
}

/// Result of moving one chunk through a stream
#[derive(Debug)]
pub struct ChunkStatus {
    /// Bytes actually moved
    pub bytes: usize,
    /// Why the stream stopped short, if it did
    pub stop: Option<TransferCause>,
}

impl ChunkStatus {
    pub fn complete(bytes: usize) -> Self {
        Self { bytes, stop: None }
    }

    pub fn short(bytes: usize, cause: TransferCause) -> Self {
        Self {
            bytes,
            stop: Some(cause),
        }
    }
}

/// Stream that moves whole chunks, stopping short only at end of data or on error
pub trait ChunkStream {
    /// Write all of `buf` unless the stream ends or fails first
    fn write_chunk(&mut self, buf: &[u8]) -> ChunkStatus;

    /// Fill all of `buf` unless the stream ends or fails first
    fn read_chunk(&mut self, buf: &mut [u8]) -> ChunkStatus;

    /// Flush in-process buffering, then force the data onto the device
    fn flush_and_sync(&mut self) -> io::Result<()>;
}

enum Stream {
    Writer(BufWriter<File>),
    Reader(File),
}

/// Open handle to a test file
///
/// Dropping the handle closes it; [`TestFile::close`] does the same but
/// reports flush errors.
pub struct TestFile {
    path: PathBuf,
    mode: OpenMode,
    direct: bool,
    stream: Option<Stream>,
    registry: Rc<RefCell<HashSet<PathBuf>>>,
}

impl TestFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// True if the file was opened bypassing the OS page cache
    pub fn is_direct(&self) -> bool {
        self.direct
    }

    /// Write `line` followed by a single `\n`
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        let writer = self.writer()?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")
    }

    /// Read up to and including the next `\n` into a line buffer of
    /// `capacity` bytes. One byte of the buffer is the terminator slot, so at
    /// most `capacity - 1` bytes come back; longer lines are truncated.
    pub fn read_line_bounded(&mut self, capacity: usize) -> io::Result<String> {
        let file = self.reader()?;
        let limit = capacity.saturating_sub(1);
        let mut bytes = Vec::with_capacity(limit);
        let mut limited = BufReader::new(Read::take(&mut *file, limit as u64));
        limited.read_until(b'\n', &mut bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Release the handle, flushing any buffered writes
    pub fn close(mut self) -> io::Result<()> {
        match self.stream.take() {
            Some(Stream::Writer(writer)) => {
                writer.into_inner().map_err(|e| e.into_error())?;
                Ok(())
            }
            Some(Stream::Reader(_)) | None => Ok(()),
        }
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        match self.stream.as_mut() {
            Some(Stream::Writer(writer)) => Ok(writer),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "file is not open for writing",
            )),
        }
    }

    fn reader(&mut self) -> io::Result<&mut File> {
        match self.stream.as_mut() {
            Some(Stream::Reader(file)) => Ok(file),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "file is not open for reading",
            )),
        }
    }
}

impl ChunkStream for TestFile {
    fn write_chunk(&mut self, buf: &[u8]) -> ChunkStatus {
        let writer = match self.writer() {
            Ok(writer) => writer,
            Err(e) => return ChunkStatus::short(0, TransferCause::DeviceError(e)),
        };

        let mut done = 0;
        while done < buf.len() {
            match writer.write(&buf[done..]) {
                Ok(0) => return ChunkStatus::short(done, TransferCause::EndOfData),
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return ChunkStatus::short(done, TransferCause::DeviceError(e)),
            }
        }
        ChunkStatus::complete(done)
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> ChunkStatus {
        let file = match self.stream.as_mut() {
            Some(Stream::Reader(file)) => file,
            _ => {
                return ChunkStatus::short(
                    0,
                    TransferCause::DeviceError(io::Error::new(
                        io::ErrorKind::Unsupported,
                        "file is not open for reading",
                    )),
                )
            }
        };

        let mut done = 0;
        while done < buf.len() {
            match file.read(&mut buf[done..]) {
                Ok(0) => return ChunkStatus::short(done, TransferCause::EndOfData),
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // Unaligned length or offset; finish the session buffered
                Err(e) if self.direct && is_direct_io_refusal(&e) => {
                    if let Err(e) = disable_direct_io(file) {
                        return ChunkStatus::short(done, TransferCause::DeviceError(e));
                    }
                    self.direct = false;
                }
                Err(e) => return ChunkStatus::short(done, TransferCause::DeviceError(e)),
            }
        }
        ChunkStatus::complete(done)
    }

    fn flush_and_sync(&mut self) -> io::Result<()> {
        let writer = self.writer()?;
        writer.flush()?;
        writer.get_ref().sync_all()
    }
}

impl Drop for TestFile {
    fn drop(&mut self) {
        self.stream = None;
        self.registry.borrow_mut().remove(&self.path);
    }
}

/// Creates, opens, renames and deletes test files on a mounted volume
///
/// At most one handle per path may be open, and no more than `max_open`
/// handles overall.
pub struct FileLifecycle {
    max_open: usize,
    direct_io: bool,
    open: Rc<RefCell<HashSet<PathBuf>>>,
}

impl FileLifecycle {
    pub fn new(max_open: usize) -> Self {
        Self {
            max_open,
            direct_io: false,
            open: Rc::new(RefCell::new(HashSet::new())),
        }
    }

    /// Try to bypass the page cache when opening files for reading
    pub fn with_direct_io(mut self, direct_io: bool) -> Self {
        self.direct_io = direct_io;
        self
    }

    /// Number of handles currently open
    pub fn open_count(&self) -> usize {
        self.open.borrow().len()
    }

    /// Delete `path` if it exists. Returns whether a file was removed.
    pub fn ensure_absent(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CardBenchError::Io(e)),
        }
    }

    pub fn open(&self, path: &Path, mode: OpenMode) -> Result<TestFile> {
        let open_error = |source: io::Error| CardBenchError::Open {
            path: path.to_path_buf(),
            mode,
            source,
        };

        {
            let open = self.open.borrow();
            if open.contains(path) {
                return Err(open_error(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "file already has an open handle",
                )));
            }
            if open.len() >= self.max_open {
                return Err(open_error(io::Error::new(
                    io::ErrorKind::Other,
                    format!("too many open files (max {})", self.max_open),
                )));
            }
        }

        let (stream, direct) = match mode {
            OpenMode::WriteTruncate => {
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(open_error)?;
                (Stream::Writer(BufWriter::new(file)), false)
            }
            OpenMode::ReadOnly => {
                let (file, direct) = open_read(path, self.direct_io).map_err(open_error)?;
                (Stream::Reader(file), direct)
            }
        };

        self.open.borrow_mut().insert(path.to_path_buf());
        Ok(TestFile {
            path: path.to_path_buf(),
            mode,
            direct,
            stream: Some(stream),
            registry: Rc::clone(&self.open),
        })
    }

    /// Rename `from` to `to`, refusing if `to` already exists, so callers
    /// wanting overwrite semantics call `ensure_absent(to)` first. The check
    /// and the rename are separate steps; a file created at `to` in between
    /// by another process is replaced.
    pub fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let rename_error = |source: io::Error| CardBenchError::Rename {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source,
        };

        if fs::symlink_metadata(to).is_ok() {
            return Err(rename_error(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "destination already exists",
            )));
        }
        fs::rename(from, to).map_err(rename_error)
    }

    /// Delete `path`; a missing file is an error here
    pub fn delete(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn open_read(path: &Path, direct_io: bool) -> io::Result<(File, bool)> {
    use std::os::unix::fs::OpenOptionsExt;

    if direct_io {
        // Try O_DIRECT first, fall back to buffered reads
        if let Ok(file) = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECT)
            .open(path)
        {
            return Ok((file, true));
        }
    }
    Ok((File::open(path)?, false))
}

#[cfg(not(target_os = "linux"))]
fn open_read(path: &Path, _direct_io: bool) -> io::Result<(File, bool)> {
    Ok((File::open(path)?, false))
}

/// The kernel rejects `O_DIRECT` transfers whose length or offset is not
/// block aligned with `EINVAL`
#[cfg(target_os = "linux")]
fn is_direct_io_refusal(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EINVAL)
}

#[cfg(not(target_os = "linux"))]
fn is_direct_io_refusal(_e: &io::Error) -> bool {
    false
}

/// Clear `O_DIRECT` on an open handle, keeping its file offset
#[cfg(target_os = "linux")]
fn disable_direct_io(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    // SAFETY: fd stays open for the lifetime of `file`; F_GETFL/F_SETFL
    // only read and update its status flags.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_DIRECT) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn disable_direct_io(_file: &File) -> io::Result<()> {
    Ok(())
}
