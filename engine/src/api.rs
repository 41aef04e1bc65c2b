//! The engine facade used by front ends.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use log::info;

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::{Phase, PickedItem, Preflight, QueueItem, TransferOptions, TransferSummary, VolumeInfo};
use crate::preflight;
use crate::progress::ProgressSink;
use crate::queue::{items_from_paths, TransferQueue};
use crate::session::{run_session, SessionContext};
use crate::volumes::{self, SpaceProbe, SystemSpaceProbe};

/// Entry point for listing volumes, preflighting and running transfers.
///
/// At most one session runs at a time. `Engine` is `Sync`: a front end can call
/// [`Engine::cancel_transfer`] from another thread (or from its progress sink)
/// while [`Engine::start_transfer`] is running.
pub struct Engine {
    config: EngineConfig,
    probe: Box<dyn SpaceProbe>,
    active: Mutex<Option<CancelToken>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_probe(config, Box::new(SystemSpaceProbe))
    }

    /// Use `probe` for free-space queries instead of the filesystem.
    pub fn with_probe(config: EngineConfig, probe: Box<dyn SpaceProbe>) -> Self {
        Engine {
            config,
            probe,
            active: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn list_volumes(&self) -> Result<Vec<VolumeInfo>, EngineError> {
        volumes::list_volumes()
    }

    /// Read-only size and fit report for `items` against `dest_mount_point`.
    pub fn preflight_scan(&self, items: &[PickedItem], dest_mount_point: &Path) -> Preflight {
        preflight::scan(
            items,
            dest_mount_point,
            self.probe.as_ref(),
            &self.config,
        )
    }

    /// Preflight the queue and stamp the result with its revision.
    pub fn preflight_queue(&self, queue: &TransferQueue, dest_mount_point: &Path) -> Preflight {
        queue.stamp(self.preflight_scan(&queue.picked(), dest_mount_point))
    }

    /// Run a transfer session to completion, pushing snapshots into `sink`.
    ///
    /// Blocks until the session reaches a terminal phase.
    pub fn start_transfer(
        &self,
        items: &[PickedItem],
        options: &TransferOptions,
        sink: &dyn ProgressSink,
    ) -> Result<TransferSummary, EngineError> {
        let token = CancelToken::new();
        {
            let mut active = self.active();
            if active.is_some() {
                return Err(EngineError::SessionActive);
            }
            *active = Some(token.clone());
        }
        let _guard = ActiveGuard(self);

        let ctx = SessionContext {
            config: &self.config,
            probe: self.probe.as_ref(),
            cancel: &token,
            sink,
        };
        run_session(items, options, &ctx)
    }

    /// Transfer everything in `queue`; the queue is cleared when the session
    /// finishes `done`.
    pub fn start_transfer_queue(
        &self,
        queue: &mut TransferQueue,
        options: &TransferOptions,
        sink: &dyn ProgressSink,
    ) -> Result<TransferSummary, EngineError> {
        let summary = self.start_transfer(&queue.picked(), options, sink)?;
        if summary.phase == Phase::Done {
            queue.clear();
        }
        Ok(summary)
    }

    /// Ask the running session to stop after its in-flight leaves.
    /// Does nothing when no session is active.
    pub fn cancel_transfer(&self) {
        if let Some(token) = self.active().as_ref() {
            info!("cancellation requested");
            token.cancel();
        }
    }

    pub fn is_busy(&self) -> bool {
        self.active().is_some()
    }

    /// Queue items for dropped paths.
    pub fn add_dropped_paths<I, P>(&self, paths: I) -> Vec<QueueItem>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        items_from_paths(paths)
    }

    fn active(&self) -> MutexGuard<'_, Option<CancelToken>> {
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Clears the active session slot, also when the session panics.
struct ActiveGuard<'a>(&'a Engine);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        *self.0.active() = None;
    }
}
