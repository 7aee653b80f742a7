//! Error types for trace recording.

use crate::session::ThreadId;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced while recording a trace.
///
/// Resource failures are fatal to the session: a tracer that silently drops
/// or corrupts records is worse than one that stops. The lifecycle variants
/// report host contract violations (a thread started twice, or a record
/// arriving for a thread with no open sink); the subsystem does not attempt
/// to recover from them. There is no transient error class and no retry
/// policy anywhere in this crate.
#[derive(Debug, Error)]
pub enum TraceError {
    /// The output directory could not be created.
    #[error("failed to create output directory {}: {}", .path.display(), .source)]
    OutputDir {
        path: PathBuf,
        source: io::Error,
    },

    /// A per-thread trace file could not be created.
    #[error("failed to create trace file {}: {}", .path.display(), .source)]
    CreateSink {
        path: PathBuf,
        source: io::Error,
    },

    /// Appending a record to a trace file failed.
    #[error("failed to append to trace file {}: {}", .path.display(), .source)]
    WriteSink {
        path: PathBuf,
        source: io::Error,
    },

    /// Flushing or closing a trace file failed.
    #[error("failed to flush trace file {}: {}", .path.display(), .source)]
    CloseSink {
        path: PathBuf,
        source: io::Error,
    },

    /// A thread-start notification arrived for a thread that already has a
    /// sink (open or closed).
    #[error("thread {0:?} already started")]
    AlreadyStarted(ThreadId),

    /// An event or thread-stop arrived for a thread that never started.
    #[error("no sink registered for thread {0:?}")]
    NoSink(ThreadId),

    /// An event or thread-stop arrived after the thread's sink was closed.
    #[error("sink for thread {0:?} is closed")]
    SinkClosed(ThreadId),

    /// Record flag bits that do not name exactly one branch kind.
    #[error("invalid record flags {0:#010x}")]
    BadRecord(u32),
}
