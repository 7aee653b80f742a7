//! Session lifecycle and the per-thread sink registry.
//!
//! A [TraceSession] is constructed once when the host collaborator loads
//! the tool and torn down once at session exit. Host lifecycle hooks map
//! onto it directly: thread-start opens a sink, every control-flow callback
//! appends one record, thread-stop closes the sink, and session exit calls
//! [TraceSession::finish] (or just drops the session).

use crate::errors::TraceError;
use crate::event::CtiEvent;
use crate::sink::{SinkNamer, ThreadSink};
use log::{error, info};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Host-assigned identity of a traced execution thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ThreadId(pub u64);
impl ThreadId {
    pub fn new(id: u64) -> Self { Self(id) }
    pub fn id(&self) -> u64 { self.0 }
}

/// Configuration supplied by the surrounding collaborator.
#[derive(Clone, Debug)]
pub struct TraceConfig {
    /// Directory receiving the per-thread trace files.
    pub output_dir: PathBuf,

    /// Tool identifier embedded in every trace file name.
    pub tool_name: String,

    /// Flush after every record instead of relying on buffering.
    /// Slow, but leaves at most one truncated record behind if the traced
    /// process dies without thread-stop notifications.
    pub flush_each: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            output_dir: std::env::temp_dir(),
            tool_name: "axon".to_string(),
            flush_each: false,
        }
    }
}

/// Lifecycle state of one thread's sink.
///
/// The per-thread state machine is: no entry (thread never started), then
/// `Open` after thread-start, then `Closed` after thread-stop. There are no
/// other transitions.
#[derive(Debug)]
enum SinkSlot {
    Open(ThreadSink),
    Closed,
}

/// A whole tracing session.
///
/// The session owns the name allocator and an explicit registry mapping
/// thread identity to sink state. The registry lock guards lifecycle
/// transitions and lookup; trace content itself is never shared between
/// threads, since each entry is only ever touched by the thread it belongs
/// to.
#[derive(Debug)]
pub struct TraceSession {
    namer: SinkNamer,
    flush_each: bool,
    sinks: Mutex<HashMap<ThreadId, SinkSlot>>,
}

impl TraceSession {
    /// Set up a session, creating the output directory if needed.
    pub fn new(cfg: TraceConfig) -> Result<Self, TraceError> {
        std::fs::create_dir_all(&cfg.output_dir).map_err(|source| {
            error!("cannot create {}: {}", cfg.output_dir.display(), source);
            TraceError::OutputDir { path: cfg.output_dir.clone(), source }
        })?;
        info!(
            "trace session '{}' writing to {}",
            cfg.tool_name,
            cfg.output_dir.display()
        );
        Ok(Self {
            namer: SinkNamer::new(&cfg.output_dir, &cfg.tool_name),
            flush_each: cfg.flush_each,
            sinks: Mutex::new(HashMap::new()),
        })
    }

    /// Thread-start notification: open a uniquely named sink for `tid`.
    ///
    /// Returns the path of the new trace file. Fails if the thread already
    /// started once, or fatally if the file cannot be created.
    pub fn thread_start(&self, tid: ThreadId) -> Result<PathBuf, TraceError> {
        let mut sinks = self.sinks.lock().unwrap();
        if sinks.contains_key(&tid) {
            return Err(TraceError::AlreadyStarted(tid));
        }
        let sink = ThreadSink::create(self.namer.next_path(), self.flush_each)?;
        let path = sink.path().to_path_buf();
        sinks.insert(tid, SinkSlot::Open(sink));
        Ok(path)
    }

    /// Append one control-flow event to the sink owned by `tid`.
    pub fn record(&self, tid: ThreadId, ev: &CtiEvent) -> Result<(), TraceError> {
        let mut sinks = self.sinks.lock().unwrap();
        match sinks.get_mut(&tid) {
            Some(SinkSlot::Open(sink)) => sink.append(ev),
            Some(SinkSlot::Closed) => Err(TraceError::SinkClosed(tid)),
            None => Err(TraceError::NoSink(tid)),
        }
    }

    /// Thread-stop notification: flush and close the sink for `tid`.
    ///
    /// Returns the number of records the thread produced.
    pub fn thread_stop(&self, tid: ThreadId) -> Result<u64, TraceError> {
        let mut sinks = self.sinks.lock().unwrap();
        match sinks.insert(tid, SinkSlot::Closed) {
            Some(SinkSlot::Open(sink)) => sink.close(),
            Some(SinkSlot::Closed) => Err(TraceError::SinkClosed(tid)),
            None => {
                sinks.remove(&tid);
                Err(TraceError::NoSink(tid))
            }
        }
    }

    /// The number of currently open sinks.
    pub fn open_sinks(&self) -> usize {
        let sinks = self.sinks.lock().unwrap();
        sinks
            .values()
            .filter(|s| matches!(s, SinkSlot::Open(_)))
            .count()
    }

    /// Session teardown: close every sink still open.
    ///
    /// Idempotent and order-independent with respect to individual
    /// thread-stop notifications; each sink is flushed and closed exactly
    /// once no matter how teardown interleaves with them. Returns the
    /// number of sinks this call closed.
    pub fn finish(&self) -> Result<usize, TraceError> {
        let mut sinks = self.sinks.lock().unwrap();
        let mut closed = 0;
        for slot in sinks.values_mut() {
            if let SinkSlot::Open(sink) = std::mem::replace(slot, SinkSlot::Closed) {
                sink.close()?;
                closed += 1;
            }
        }
        if closed > 0 {
            info!("session teardown closed {} open sink(s)", closed);
        }
        Ok(closed)
    }
}

impl Drop for TraceSession {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            error!("session teardown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::branch::Outcome;

    fn session(dir: &std::path::Path) -> TraceSession {
        TraceSession::new(TraceConfig {
            output_dir: dir.to_path_buf(),
            tool_name: "test".to_string(),
            flush_each: false,
        })
        .unwrap()
    }

    #[test]
    fn lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(dir.path());
        let tid = ThreadId::new(1);

        let path = s.thread_start(tid).unwrap();
        assert_eq!(s.open_sinks(), 1);

        s.record(
            tid,
            &CtiEvent::Branch { pc: 0x1000, tgt: 0x1010, outcome: Outcome::T, ilen: 2 },
        )
        .unwrap();
        assert_eq!(s.thread_stop(tid).unwrap(), 1);
        assert_eq!(s.open_sinks(), 0);
        assert!(path.exists());
    }

    #[test]
    fn contract_violations_are_loud() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(dir.path());
        let tid = ThreadId::new(7);
        let ev = CtiEvent::Return { pc: 0x4000, tgt: 0x4050, ilen: 1 };

        assert!(matches!(s.record(tid, &ev), Err(TraceError::NoSink(_))));
        assert!(matches!(s.thread_stop(tid), Err(TraceError::NoSink(_))));

        s.thread_start(tid).unwrap();
        assert!(matches!(
            s.thread_start(tid),
            Err(TraceError::AlreadyStarted(_))
        ));

        s.thread_stop(tid).unwrap();
        assert!(matches!(s.record(tid, &ev), Err(TraceError::SinkClosed(_))));
        assert!(matches!(
            s.thread_stop(tid),
            Err(TraceError::SinkClosed(_))
        ));
        // A stopped thread can never restart
        assert!(matches!(
            s.thread_start(tid),
            Err(TraceError::AlreadyStarted(_))
        ));
    }

    #[test]
    fn finish_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(dir.path());
        s.thread_start(ThreadId::new(1)).unwrap();
        s.thread_start(ThreadId::new(2)).unwrap();
        s.thread_stop(ThreadId::new(2)).unwrap();

        assert_eq!(s.finish().unwrap(), 1);
        assert_eq!(s.finish().unwrap(), 0);
        assert_eq!(s.open_sinks(), 0);
    }

    #[test]
    fn fatal_when_output_dir_unavailable() {
        // A regular file where a directory component should be
        let file = tempfile::NamedTempFile::new().unwrap();
        let res = TraceSession::new(TraceConfig {
            output_dir: file.path().join("sub"),
            tool_name: "test".to_string(),
            flush_each: false,
        });
        assert!(matches!(res, Err(TraceError::OutputDir { .. })));
    }
}
