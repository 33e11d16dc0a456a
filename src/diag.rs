//! Diagnostics sink
//!
//! Core components report leveled, tagged lines through a sink handed to
//! them by the caller instead of printing. The binary forwards to the `log`
//! facade; tests record lines in memory.

use std::cell::RefCell;
use std::fmt;

use indicatif::{ProgressBar, ProgressStyle};

use crate::bench::transfer::TransferOp;

/// Severity of a diagnostics line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<Level> for log::Level {
    fn from(level: Level) -> Self {
        match level {
            Level::Debug => log::Level::Debug,
            Level::Info => log::Level::Info,
            Level::Warn => log::Level::Warn,
            Level::Error => log::Level::Error,
        }
    }
}

/// Line-oriented diagnostics side channel
pub trait DiagnosticsSink {
    /// Emit one formatted line
    fn emit(&self, level: Level, tag: &str, args: fmt::Arguments<'_>);

    /// Called after every chunk of a transfer session
    fn progress(&self, _op: TransferOp, _done: u64, _total: u64) {}

    fn debug(&self, tag: &str, args: fmt::Arguments<'_>) {
        self.emit(Level::Debug, tag, args);
    }

    fn info(&self, tag: &str, args: fmt::Arguments<'_>) {
        self.emit(Level::Info, tag, args);
    }

    fn warn(&self, tag: &str, args: fmt::Arguments<'_>) {
        self.emit(Level::Warn, tag, args);
    }

    fn error(&self, tag: &str, args: fmt::Arguments<'_>) {
        self.emit(Level::Error, tag, args);
    }
}

/// Forwards lines to the `log` facade, using the tag as log target
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticsSink for LogSink {
    fn emit(&self, level: Level, tag: &str, args: fmt::Arguments<'_>) {
        log::log!(target: tag, log::Level::from(level), "{}", args);
    }
}

/// Sink used by the binary: log lines plus a progress bar per transfer
#[derive(Default)]
pub struct ConsoleSink {
    bar: RefCell<Option<(TransferOp, ProgressBar)>>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_bar(op: TransferOp, total: u64) -> ProgressBar {
        let bar = ProgressBar::new(total);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner} {msg} {bytes}/{total_bytes} ({eta})")
        {
            bar.set_style(style);
        }
        bar.set_message(op.description());
        bar
    }
}

impl DiagnosticsSink for ConsoleSink {
    fn emit(&self, level: Level, tag: &str, args: fmt::Arguments<'_>) {
        match self.bar.borrow().as_ref() {
            Some((_, bar)) => bar.suspend(|| LogSink.emit(level, tag, args)),
            None => LogSink.emit(level, tag, args),
        }
    }

    fn progress(&self, op: TransferOp, done: u64, total: u64) {
        let mut slot = self.bar.borrow_mut();
        // A session that failed part way leaves its bar behind
        let stale = matches!(
            slot.as_ref(),
            Some((current, bar)) if *current != op || bar.length() != Some(total)
        );
        if stale {
            if let Some((_, bar)) = slot.take() {
                bar.abandon();
            }
        }

        let (_, bar) = slot.get_or_insert_with(|| (op, Self::new_bar(op, total)));
        bar.set_position(done);
        if done >= total {
            bar.finish_and_clear();
            *slot = None;
        }
    }
}

/// One line captured by [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedLine {
    pub level: Level,
    pub tag: String,
    pub message: String,
}

/// In-memory sink for tests and embedding
#[derive(Debug, Default)]
pub struct RecordingSink {
    lines: RefCell<Vec<RecordedLine>>,
    progress: RefCell<Vec<(TransferOp, u64, u64)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<RecordedLine> {
        self.lines.borrow().clone()
    }

    pub fn progress_events(&self) -> Vec<(TransferOp, u64, u64)> {
        self.progress.borrow().clone()
    }

    /// True if any line at `level` contains `needle`
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.lines
            .borrow()
            .iter()
            .any(|line| line.level == level && line.message.contains(needle))
    }
}

impl DiagnosticsSink for RecordingSink {
    fn emit(&self, level: Level, tag: &str, args: fmt::Arguments<'_>) {
        self.lines.borrow_mut().push(RecordedLine {
            level,
            tag: tag.to_string(),
            message: args.to_string(),
        });
    }

    fn progress(&self, op: TransferOp, done: u64, total: u64) {
        self.progress.borrow_mut().push((op, done, total));
    }
}
