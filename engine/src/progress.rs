//! Progress reporting.
//!
//! The caller hands a [`ProgressSink`] to the session at start. The engine
//! pushes [`TransferProgress`] snapshots into it, never more often than the
//! configured interval except on phase changes, which are always delivered.
//!
//! Snapshots are produced under a single lock, so within a session
//! `bytes_done` and `current_file` never go backwards.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use crate::model::{percent, Phase, TransferProgress};

/// Receives progress snapshots.
///
/// Called from worker threads; implementations must be cheap and must not block.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: &TransferProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(&TransferProgress) + Send + Sync,
{
    fn on_progress(&self, progress: &TransferProgress) {
        self(progress)
    }
}

/// Forwards snapshots over a channel. A disconnected receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink(pub Sender<TransferProgress>);

impl ProgressSink for ChannelSink {
    fn on_progress(&self, progress: &TransferProgress) {
        let _ = self.0.send(progress.clone());
    }
}

/// Sink that drops every snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_progress(&self, _progress: &TransferProgress) {}
}

struct EmitState {
    phase: Phase,
    current_path: String,
    last_emit: Option<Instant>,
}

/// Session-wide counters plus the throttle in front of the sink.
pub(crate) struct Reporter<'a> {
    sink: &'a dyn ProgressSink,
    interval: Duration,
    total_files: u64,
    bytes_total: u64,
    bytes_done: AtomicU64,
    current_file: AtomicU64,
    state: Mutex<EmitState>,
}

impl<'a> Reporter<'a> {
    pub fn new(sink: &'a dyn ProgressSink, interval: Duration, total_files: u64, bytes_total: u64) -> Self {
        Reporter {
            sink,
            interval,
            total_files,
            bytes_total,
            bytes_done: AtomicU64::new(0),
            current_file: AtomicU64::new(0),
            state: Mutex::new(EmitState {
                phase: Phase::Scanning,
                current_path: String::new(),
                last_emit: None,
            }),
        }
    }

    #[cfg(test)]
    pub fn bytes_done(&self) -> u64 {
        self.bytes_done.load(Ordering::SeqCst)
    }

    /// Switch phase and always deliver a snapshot.
    pub fn set_phase(&self, phase: Phase) {
        let mut state = self.lock();
        state.phase = phase;
        self.emit(&mut state, phase);
    }

    /// A leaf with 1-based `index` was handed to a worker.
    pub fn dispatched(&self, index: u64, path: &std::path::Path) {
        self.current_file.fetch_max(index, Ordering::SeqCst);
        let mut state = self.lock();
        state.current_path = path.display().to_string();
        self.maybe_emit(&mut state);
    }

    pub fn add_bytes(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        self.bytes_done.fetch_add(bytes, Ordering::SeqCst);
        let mut state = self.lock();
        self.maybe_emit(&mut state);
    }

    /// One-off `verifying` snapshot for the leaf at `path`.
    pub fn verifying(&self, path: &std::path::Path) {
        let mut state = self.lock();
        state.current_path = path.display().to_string();
        self.emit(&mut state, Phase::Verifying);
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> TransferProgress {
        let state = self.lock();
        self.build(state.phase, &state.current_path)
    }

    fn maybe_emit(&self, state: &mut EmitState) {
        let due = match state.last_emit {
            None => true,
            Some(at) => at.elapsed() >= self.interval,
        };
        if due {
            let phase = state.phase;
            self.emit(state, phase);
        }
    }

    fn emit(&self, state: &mut EmitState, phase: Phase) {
        state.last_emit = Some(Instant::now());
        let progress = self.build(phase, &state.current_path);
        self.sink.on_progress(&progress);
    }

    fn build(&self, phase: Phase, current_path: &str) -> TransferProgress {
        let bytes_done = self.bytes_done.load(Ordering::SeqCst);
        TransferProgress {
            phase,
            current_file: self.current_file.load(Ordering::SeqCst),
            total_files: self.total_files,
            current_path: current_path.to_string(),
            bytes_done,
            bytes_total: self.bytes_total,
            percent: percent(bytes_done, self.bytes_total),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EmitState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
