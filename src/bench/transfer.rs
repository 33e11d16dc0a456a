//! Chunked transfer driver
//!
//! Moves a target number of bytes through a [`ChunkStream`] one buffer-sized
//! chunk at a time. A chunk that moves fewer bytes than requested ends the
//! session as Failed; nothing is retried.

use std::fmt;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::diag::DiagnosticsSink;
use crate::io::file::{ChunkStatus, ChunkStream};
use crate::util::units::format_bytes;
use crate::{CardBenchError, Result, TAG};

/// Direction of a transfer session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferOp {
    Write,
    Read,
}

impl TransferOp {
    pub fn description(&self) -> &'static str {
        match self {
            TransferOp::Write => "Write",
            TransferOp::Read => "Read",
        }
    }
}

impl fmt::Display for TransferOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Why a chunk stopped short
#[derive(Debug)]
pub enum TransferCause {
    /// The stream reported end of data
    EndOfData,
    /// The stream reported an error condition
    DeviceError(io::Error),
}

impl fmt::Display for TransferCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferCause::EndOfData => write!(f, "end of data"),
            TransferCause::DeviceError(e) => write!(f, "device error: {}", e),
        }
    }
}

/// A chunk that moved fewer bytes than requested
#[derive(Debug)]
pub struct PartialTransfer {
    pub op: TransferOp,
    /// Sum of all fully successful chunks before the short one
    pub bytes_so_far: u64,
    /// Size of the chunk that came up short
    pub requested: usize,
    /// Bytes the short chunk did move
    pub transferred: usize,
    pub cause: TransferCause,
}

impl PartialTransfer {
    pub(crate) fn io_source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.cause {
            TransferCause::DeviceError(e) => Some(e),
            TransferCause::EndOfData => None,
        }
    }
}

impl fmt::Display for PartialTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} moved {} of {} bytes after {} bytes ({})",
            self.op, self.transferred, self.requested, self.bytes_so_far, self.cause
        )
    }
}

/// Session lifecycle: `Idle -> Transferring -> {Completed, Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Transferring,
    Completed,
    Failed,
}

/// What ended a Failed session
#[derive(Debug)]
pub enum TransferFailure {
    Partial(PartialTransfer),
    /// Flushing or syncing written data failed
    Durability(io::Error),
}

/// One drive of a transfer from zero to a target byte count
#[derive(Debug)]
pub struct TransferSession {
    op: TransferOp,
    target_size: u64,
    bytes_transferred: u64,
    chunks: u64,
    state: SessionState,
    failure: Option<TransferFailure>,
}

impl TransferSession {
    pub fn new(op: TransferOp, target_size: u64) -> Self {
        Self {
            op,
            target_size,
            bytes_transferred: 0,
            chunks: 0,
            state: SessionState::Idle,
            failure: None,
        }
    }

    pub fn op(&self) -> TransferOp {
        self.op
    }

    pub fn target_size(&self) -> u64 {
        self.target_size
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    /// Number of fully successful chunks
    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn failure(&self) -> Option<&TransferFailure> {
        self.failure.as_ref()
    }

    pub fn is_completed(&self) -> bool {
        self.state == SessionState::Completed
    }

    /// Bytes transferred on success, or the failure as a crate error
    pub fn into_result(self, path: &Path) -> Result<u64> {
        match (self.state, self.failure) {
            (SessionState::Completed, _) => Ok(self.bytes_transferred),
            (_, Some(TransferFailure::Partial(partial))) => {
                Err(CardBenchError::PartialTransfer(partial))
            }
            (_, Some(TransferFailure::Durability(source))) => Err(CardBenchError::Durability {
                path: path.to_path_buf(),
                source,
            }),
            (state, None) => Err(CardBenchError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("transfer session ended in state {:?}", state),
            ))),
        }
    }

    fn remaining(&self) -> u64 {
        self.target_size - self.bytes_transferred
    }

    fn begin(&mut self) {
        debug_assert_eq!(self.state, SessionState::Idle);
        self.state = SessionState::Transferring;
    }

    fn record_chunk(&mut self, bytes: usize) {
        self.bytes_transferred += bytes as u64;
        self.chunks += 1;
    }

    fn complete(&mut self) {
        debug_assert_eq!(self.state, SessionState::Transferring);
        self.state = SessionState::Completed;
    }

    fn fail(&mut self, failure: TransferFailure) {
        debug_assert_eq!(self.state, SessionState::Transferring);
        self.state = SessionState::Failed;
        self.failure = Some(failure);
    }
}

/// Write `target_size` bytes from `buffer`, then flush and sync.
///
/// The session only completes once the data is durable on the device.
pub fn drive_write<S: ChunkStream + ?Sized>(
    stream: &mut S,
    buffer: &[u8],
    target_size: u64,
    sink: &dyn DiagnosticsSink,
) -> TransferSession {
    let mut session = TransferSession::new(TransferOp::Write, target_size);
    session.begin();

    let chunks_ok = drive_chunks(&mut session, buffer.len(), sink, |len| {
        stream.write_chunk(&buffer[..len])
    });
    if !chunks_ok {
        return session;
    }

    sink.debug(
        TAG,
        format_args!("Syncing {} to disk...", format_bytes(session.bytes_transferred)),
    );
    match stream.flush_and_sync() {
        Ok(()) => session.complete(),
        Err(e) => {
            sink.error(TAG, format_args!("Sync failed: {}", e));
            session.fail(TransferFailure::Durability(e));
        }
    }
    session
}

/// Read `target_size` bytes into `buffer`, one chunk at a time
pub fn drive_read<S: ChunkStream + ?Sized>(
    stream: &mut S,
    buffer: &mut [u8],
    target_size: u64,
    sink: &dyn DiagnosticsSink,
) -> TransferSession {
    let mut session = TransferSession::new(TransferOp::Read, target_size);
    session.begin();

    let capacity = buffer.len();
    if drive_chunks(&mut session, capacity, sink, |len| {
        stream.read_chunk(&mut buffer[..len])
    }) {
        session.complete();
    }
    session
}

/// Run chunks until the target is reached. Returns false if the session failed.
fn drive_chunks(
    session: &mut TransferSession,
    capacity: usize,
    sink: &dyn DiagnosticsSink,
    mut step: impl FnMut(usize) -> ChunkStatus,
) -> bool {
    let op = session.op;
    if capacity == 0 && session.target_size > 0 {
        session.fail(TransferFailure::Partial(PartialTransfer {
            op,
            bytes_so_far: 0,
            requested: 0,
            transferred: 0,
            cause: TransferCause::DeviceError(io::Error::new(
                io::ErrorKind::InvalidInput,
                "transfer buffer is empty",
            )),
        }));
        return false;
    }

    while session.remaining() > 0 {
        let chunk = session.remaining().min(capacity as u64) as usize;
        let status = step(chunk);

        if status.bytes < chunk {
            let cause = status.stop.unwrap_or(TransferCause::EndOfData);
            report_short_chunk(sink, session, chunk, status.bytes, &cause);
            session.fail(TransferFailure::Partial(PartialTransfer {
                op,
                bytes_so_far: session.bytes_transferred,
                requested: chunk,
                transferred: status.bytes,
                cause,
            }));
            return false;
        }

        session.record_chunk(chunk);
        sink.debug(
            TAG,
            format_args!(
                "{} {} bytes, total {}/{}",
                match op {
                    TransferOp::Write => "Wrote",
                    TransferOp::Read => "Read",
                },
                chunk,
                session.bytes_transferred,
                session.target_size
            ),
        );
        sink.progress(op, session.bytes_transferred, session.target_size);
    }
    true
}

fn report_short_chunk(
    sink: &dyn DiagnosticsSink,
    session: &TransferSession,
    requested: usize,
    moved: usize,
    cause: &TransferCause,
) {
    sink.error(
        TAG,
        format_args!(
            "{} partial/failed: moved={}, expected={}, total={}, cause={}",
            session.op, moved, requested, session.bytes_transferred, cause
        ),
    );
    match cause {
        TransferCause::EndOfData => sink.warn(
            TAG,
            format_args!("Unexpected EOF at {} bytes", session.bytes_transferred),
        ),
        TransferCause::DeviceError(e) => {
            sink.error(TAG, format_args!("{} failed with error {}", session.op, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::{Level, RecordingSink};

    #[derive(Clone, Copy)]
    enum Fault {
        Eof,
        Device,
    }

    /// Stream that records chunk sizes and can come up short at one chunk
    #[derive(Default)]
    struct ScriptedStream {
        chunks: Vec<usize>,
        short_at: Option<(usize, usize, Option<Fault>)>,
        sync_fails: bool,
        synced: bool,
    }

    impl ScriptedStream {
        fn short_at(index: usize, moved: usize, fault: Fault) -> Self {
            Self {
                short_at: Some((index, moved, Some(fault))),
                ..Self::default()
            }
        }

        fn step(&mut self, len: usize) -> ChunkStatus {
            let index = self.chunks.len();
            self.chunks.push(len);
            match self.short_at {
                Some((at, moved, fault)) if at == index => match fault {
                    Some(Fault::Eof) => ChunkStatus::short(moved, TransferCause::EndOfData),
                    Some(Fault::Device) => ChunkStatus::short(
                        moved,
                        TransferCause::DeviceError(io::Error::new(io::ErrorKind::Other, "card")),
                    ),
                    None => ChunkStatus::complete(moved),
                },
                _ => ChunkStatus::complete(len),
            }
        }
    }

    impl ChunkStream for ScriptedStream {
        fn write_chunk(&mut self, buf: &[u8]) -> ChunkStatus {
            self.step(buf.len())
        }

        fn read_chunk(&mut self, buf: &mut [u8]) -> ChunkStatus {
            let status = self.step(buf.len());
            buf[..status.bytes].fill(0x5A);
            status
        }

        fn flush_and_sync(&mut self) -> io::Result<()> {
            if self.sync_fails {
                return Err(io::Error::new(io::ErrorKind::Other, "sync failed"));
            }
            self.synced = true;
            Ok(())
        }
    }

    #[test]
    fn test_exact_multiple_of_buffer() {
        let sink = RecordingSink::new();
        let mut stream = ScriptedStream::default();
        let buffer = vec![0u8; 131072];

        let session = drive_write(&mut stream, &buffer, 4194304, &sink);

        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.bytes_transferred(), 4194304);
        assert_eq!(session.chunks(), 32);
        assert_eq!(stream.chunks.len(), 32);
        assert!(stream.chunks.iter().all(|&c| c == 131072));
        assert!(stream.synced);
    }

    #[test]
    fn test_trailing_short_chunk_is_not_padded() {
        let sink = RecordingSink::new();
        let mut stream = ScriptedStream::default();
        let mut buffer = vec![0u8; 131072];

        let session = drive_read(&mut stream, &mut buffer, 4194305, &sink);

        assert!(session.is_completed());
        assert_eq!(session.bytes_transferred(), 4194305);
        assert_eq!(stream.chunks.len(), 33);
        assert!(stream.chunks[..32].iter().all(|&c| c == 131072));
        assert_eq!(stream.chunks[32], 1);
    }

    #[test]
    fn test_small_target_single_chunk() {
        let sink = RecordingSink::new();
        let mut stream = ScriptedStream::default();
        let buffer = vec![0u8; 4096];

        let session = drive_write(&mut stream, &buffer, 100, &sink);
        assert!(session.is_completed());
        assert_eq!(stream.chunks, vec![100]);
    }

    #[test]
    fn test_zero_target_completes_without_chunks() {
        let sink = RecordingSink::new();
        let mut stream = ScriptedStream::default();
        let buffer = vec![0u8; 4096];

        let session = drive_write(&mut stream, &buffer, 0, &sink);
        assert!(session.is_completed());
        assert!(stream.chunks.is_empty());
        assert!(stream.synced);
    }

    #[test]
    fn test_short_chunk_at_any_index_stops_session() {
        for index in [0usize, 1, 5, 31] {
            let sink = RecordingSink::new();
            let mut stream = ScriptedStream::short_at(index, 100, Fault::Eof);
            let mut buffer = vec![0u8; 131072];

            let session = drive_read(&mut stream, &mut buffer, 4194304, &sink);

            assert_eq!(session.state(), SessionState::Failed);
            assert_eq!(stream.chunks.len(), index + 1, "no chunks after the short one");
            assert_eq!(session.bytes_transferred(), index as u64 * 131072);
            match session.failure() {
                Some(TransferFailure::Partial(partial)) => {
                    assert_eq!(partial.bytes_so_far, index as u64 * 131072);
                    assert_eq!(partial.requested, 131072);
                    assert_eq!(partial.transferred, 100);
                    assert!(matches!(partial.cause, TransferCause::EndOfData));
                }
                other => panic!("unexpected failure: {:?}", other),
            }
        }
    }

    #[test]
    fn test_device_error_is_distinct_from_end_of_data() {
        let sink = RecordingSink::new();
        let mut stream = ScriptedStream::short_at(2, 0, Fault::Device);
        let buffer = vec![0u8; 1024];

        let session = drive_write(&mut stream, &buffer, 10 * 1024, &sink);

        assert_eq!(session.state(), SessionState::Failed);
        assert!(!stream.synced, "failed write must not reach the sync step");
        match session.failure() {
            Some(TransferFailure::Partial(partial)) => {
                assert!(matches!(partial.cause, TransferCause::DeviceError(_)));
                assert_eq!(partial.bytes_so_far, 2048);
            }
            other => panic!("unexpected failure: {:?}", other),
        }
        assert!(sink.contains(Level::Error, "failed with error"));
        assert!(!sink.contains(Level::Warn, "Unexpected EOF"));
    }

    #[test]
    fn test_end_of_data_logs_unexpected_eof() {
        let sink = RecordingSink::new();
        let mut stream = ScriptedStream::short_at(1, 10, Fault::Eof);
        let mut buffer = vec![0u8; 1024];

        drive_read(&mut stream, &mut buffer, 4096, &sink);
        assert!(sink.contains(Level::Warn, "Unexpected EOF at 1024 bytes"));
    }

    #[test]
    fn test_short_count_without_cause_still_fails() {
        let sink = RecordingSink::new();
        let mut stream = ScriptedStream {
            short_at: Some((0, 10, None)),
            ..ScriptedStream::default()
        };
        let mut buffer = vec![0u8; 1024];

        let session = drive_read(&mut stream, &mut buffer, 4096, &sink);
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(stream.chunks.len(), 1);
    }

    #[test]
    fn test_sync_failure_fails_write_session() {
        let sink = RecordingSink::new();
        let mut stream = ScriptedStream {
            sync_fails: true,
            ..ScriptedStream::default()
        };
        let buffer = vec![0u8; 1024];

        let session = drive_write(&mut stream, &buffer, 4096, &sink);
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(session.bytes_transferred(), 4096);
        assert!(matches!(session.failure(), Some(TransferFailure::Durability(_))));

        let err = session.into_result(Path::new("/sdcard/test.txt")).unwrap_err();
        assert!(matches!(err, CardBenchError::Durability { .. }));
    }

    #[test]
    fn test_read_session_does_not_sync() {
        let sink = RecordingSink::new();
        let mut stream = ScriptedStream::default();
        let mut buffer = vec![0u8; 1024];

        let session = drive_read(&mut stream, &mut buffer, 2048, &sink);
        assert!(session.is_completed());
        assert!(!stream.synced);
        assert_eq!(buffer[0], 0x5A);
    }

    #[test]
    fn test_empty_buffer_fails_instead_of_spinning() {
        let sink = RecordingSink::new();
        let mut stream = ScriptedStream::default();

        let session = drive_write(&mut stream, &[], 10, &sink);
        assert_eq!(session.state(), SessionState::Failed);
        assert!(stream.chunks.is_empty());
    }

    #[test]
    fn test_progress_is_monotonic_and_bounded() {
        let sink = RecordingSink::new();
        let mut stream = ScriptedStream::default();
        let buffer = vec![0u8; 1000];

        drive_write(&mut stream, &buffer, 3500, &sink);

        let events = sink.progress_events();
        let done: Vec<u64> = events.iter().map(|&(_, done, _)| done).collect();
        assert_eq!(done, vec![1000, 2000, 3000, 3500]);
        assert!(events.iter().all(|&(op, _, total)| op == TransferOp::Write && total == 3500));
    }

    #[test]
    fn test_into_result() {
        let sink = RecordingSink::new();
        let mut stream = ScriptedStream::default();
        let buffer = vec![0u8; 512];
        let session = drive_write(&mut stream, &buffer, 1024, &sink);
        assert_eq!(session.into_result(Path::new("x")).unwrap(), 1024);

        let mut stream = ScriptedStream::short_at(0, 0, Fault::Eof);
        let session = drive_write(&mut stream, &buffer, 1024, &sink);
        let err = session.into_result(Path::new("x")).unwrap_err();
        assert!(matches!(err, CardBenchError::PartialTransfer(_)));
    }

    #[test]
    fn test_new_session_is_idle() {
        let session = TransferSession::new(TransferOp::Read, 10);
        assert_eq!(session.op(), TransferOp::Read);
        assert_eq!(session.target_size(), 10);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.bytes_transferred(), 0);
        assert!(session.failure().is_none());
    }
}
