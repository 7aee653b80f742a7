//! Per-thread trace output.
//!
//! Each traced thread owns exactly one [ThreadSink] for its whole lifetime.
//! Records are appended in execution order and nothing is ever read back;
//! the file is a flat run of [TraceRecord] wire forms.

use crate::branch::TraceRecord;
use crate::errors::TraceError;
use crate::event::CtiEvent;
use log::debug;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

/// Allocates collision-free trace file paths within one process.
///
/// Paths look like `<dir>/<tool>.<pid>.<seq>.bin`. The sequence number is
/// a process-wide atomic counter, so threads racing through start-up can
/// never be handed the same path, and traces from repeated runs of the same
/// program are distinguished by pid.
#[derive(Debug)]
pub struct SinkNamer {
    dir: PathBuf,
    tool: String,
    pid: u32,
    seq: AtomicU32,
}

impl SinkNamer {
    pub fn new(dir: impl Into<PathBuf>, tool: impl ToString) -> Self {
        Self {
            dir: dir.into(),
            tool: tool.to_string(),
            pid: std::process::id(),
            seq: AtomicU32::new(0),
        }
    }

    /// Return the next unused path.
    pub fn next_path(&self) -> PathBuf {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.dir
            .join(format!("{}.{:05}.{:04}.bin", self.tool, self.pid, seq))
    }
}

/// The open trace file owned by a single traced thread.
///
/// A sink is created on thread-start, written to only by its owning thread,
/// and consumed by [ThreadSink::close] on thread-stop, so a write after
/// close cannot be expressed against an owned sink.
#[derive(Debug)]
pub struct ThreadSink {
    path: PathBuf,
    out: BufWriter<File>,
    records: u64,
    flush_each: bool,
}

impl ThreadSink {
    /// Create the backing file. Failure here is fatal to the session: a
    /// thread without a sink cannot safely be traced.
    pub fn create(path: PathBuf, flush_each: bool) -> Result<Self, TraceError> {
        let file = File::create(&path).map_err(|source| TraceError::CreateSink {
            path: path.clone(),
            source,
        })?;
        debug!("opened trace sink {}", path.display());
        Ok(Self {
            path,
            out: BufWriter::new(file),
            records: 0,
            flush_each,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The number of records appended so far.
    pub fn num_records(&self) -> u64 {
        self.records
    }

    /// Encode one event and append its record.
    pub fn append(&mut self, ev: &CtiEvent) -> Result<(), TraceError> {
        self.write_record(&ev.encode())
    }

    /// Append an already-encoded record.
    pub fn write_record(&mut self, rec: &TraceRecord) -> Result<(), TraceError> {
        self.out
            .write_all(&rec.to_bytes())
            .map_err(|source| TraceError::WriteSink {
                path: self.path.clone(),
                source,
            })?;
        if self.flush_each {
            self.out.flush().map_err(|source| TraceError::WriteSink {
                path: self.path.clone(),
                source,
            })?;
        }
        self.records += 1;
        Ok(())
    }

    /// Flush and close, returning the number of records written.
    pub fn close(mut self) -> Result<u64, TraceError> {
        self.out.flush().map_err(|source| TraceError::CloseSink {
            path: self.path.clone(),
            source,
        })?;
        debug!(
            "closed trace sink {} ({} records)",
            self.path.display(),
            self.records
        );
        Ok(self.records)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::branch::Outcome;

    #[test]
    fn namer_paths_are_distinct() {
        let namer = SinkNamer::new("/tmp", "axon");
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            assert!(seen.insert(namer.next_path()));
        }
    }

    #[test]
    fn append_and_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bin");
        let mut sink = ThreadSink::create(path.clone(), false).unwrap();

        sink.append(&CtiEvent::JumpDirect { pc: 0x10, tgt: 0x80, ilen: 5 })
            .unwrap();
        sink.append(&CtiEvent::Branch {
            pc: 0x80,
            tgt: 0x10,
            outcome: Outcome::N,
            ilen: 2,
        })
        .unwrap();
        assert_eq!(sink.num_records(), 2);
        assert_eq!(sink.close().unwrap(), 2);

        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), 2 * TraceRecord::SIZE);
        let first =
            TraceRecord::from_bytes(data[..TraceRecord::SIZE].try_into().unwrap()).unwrap();
        assert_eq!((first.pc, first.tgt), (0x10, 0x80));
    }

    #[test]
    fn create_fails_in_missing_dir() {
        let res = ThreadSink::create(PathBuf::from("/nonexistent-dir/t.bin"), false);
        assert!(matches!(res, Err(TraceError::CreateSink { .. })));
    }
}
