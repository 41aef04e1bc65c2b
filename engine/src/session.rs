//! Transfer session orchestration.
//!
//! A session runs through these steps:
//! - Expand the queued items into leaves (`scanning`)
//! - Check free space, create the session directory and the manifest journal
//! - Dispatch leaves to a bounded worker pool (`copying`, `verifying`)
//! - Assemble the summary and finish the manifest (`done`, `cancelled` or `error`)
//!
//! Individual leaf failures are recorded and the session continues. Only a lost
//! destination or an unwritable manifest stops it early.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::category::FOLDERS_DIR;
use crate::config::EngineConfig;
use crate::conflict::{resolve_against, Resolution};
use crate::error::{is_device_gone, EngineError, FatalSessionError, LeafError};
use crate::executor::{skipped_entry, Executed, Executor, LeafObserver, LeafOutcome};
use crate::expand::expand;
use crate::manifest::ManifestWriter;
use crate::model::{FileLeaf, LeafStatus, Phase, PickedItem, TransferOptions, TransferProgress, TransferSummary};
use crate::preflight::fits;
use crate::progress::{ProgressSink, Reporter};
use crate::volumes::SpaceProbe;

pub const README_FILE: &str = "README.txt";
pub const LATEST_FILE: &str = "_latest.txt";

/// Where a session writes: the root below the mount point, the optional day
/// directory, and the session directory itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub root: PathBuf,
    pub day_dir: Option<PathBuf>,
    pub session_dir: PathBuf,
}

/// Create a fresh session directory named after `now`.
///
/// `<root>/<YYYY-MM-DD_HHMMSS>`, or `<root>/<YYYY-MM-DD>/<HHMMSS>` when
/// grouping by date. An existing directory is never reused: a `_N` suffix is
/// appended until the name is free.
pub fn create_session_dir(
    options: &TransferOptions,
    now: DateTime<Local>,
) -> Result<SessionPaths, FatalSessionError> {
    let root = options.root_dir();
    let (parent, day_dir, base) = if options.group_by_date {
        let day = root.join(now.format("%Y-%m-%d").to_string());
        (day.clone(), Some(day), now.format("%H%M%S").to_string())
    } else {
        (root.clone(), None, now.format("%Y-%m-%d_%H%M%S").to_string())
    };

    fs::create_dir_all(&parent).map_err(|source| FatalSessionError::SessionDirectory {
        path: parent.clone(),
        source,
    })?;

    let mut suffix = 0u32;
    loop {
        let name = if suffix == 0 {
            base.clone()
        } else {
            format!("{base}_{suffix}")
        };
        let candidate = parent.join(name);
        match fs::create_dir(&candidate) {
            Ok(()) => {
                return Ok(SessionPaths {
                    root,
                    day_dir,
                    session_dir: candidate,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && suffix < u32::MAX => suffix += 1,
            Err(source) => {
                return Err(FatalSessionError::SessionDirectory {
                    path: candidate,
                    source,
                })
            }
        }
    }
}

/// Write the README once and point `_latest.txt` at the new session.
/// Failures are logged only.
pub fn write_housekeeping(paths: &SessionPaths) {
    let readme = paths.root.join(README_FILE);
    if !readme.exists() {
        if let Err(e) = fs::write(&readme, README_TEXT) {
            warn!("could not write {}: {}", readme.display(), e);
        }
    }

    let target = paths.session_dir.to_string_lossy().to_string();
    let pointers = std::iter::once(&paths.root).chain(paths.day_dir.as_ref());
    for dir in pointers {
        let latest = dir.join(LATEST_FILE);
        if let Err(e) = fs::write(&latest, &target) {
            warn!("could not update {}: {}", latest.display(), e);
        }
    }
}

const README_TEXT: &str = "\
Offload transfers

Each transfer session gets its own directory:
  <YYYY-MM-DD_HHMMSS>/            (or <YYYY-MM-DD>/<HHMMSS>/ when grouped by date)
    Folders/<folder>/...          folder picks, tree preserved
    Images/ Videos/ Audio/ Documents/ Archives/ Code/ Other/
                                  loose files, grouped by type
    manifest.jsonl                one line per file, written as the transfer runs
    manifest.json                 complete record, written when the session ends

_latest.txt holds the path of the most recent session.
";

/// Path of `leaf` relative to the session directory.
pub fn destination_relative(leaf: &FileLeaf, options: &TransferOptions) -> PathBuf {
    match &leaf.folder_rel {
        Some(rel) if options.preserve_folder_structure => {
            if options.group_by_type {
                Path::new(FOLDERS_DIR).join(rel)
            } else {
                rel.clone()
            }
        }
        _ => {
            if options.group_by_type {
                Path::new(leaf.category.as_str()).join(leaf.file_name())
            } else {
                PathBuf::from(leaf.file_name())
            }
        }
    }
}

/// Everything a session borrows from the engine.
pub struct SessionContext<'a> {
    pub config: &'a EngineConfig,
    pub probe: &'a dyn SpaceProbe,
    pub cancel: &'a CancelToken,
    pub sink: &'a dyn ProgressSink,
}

#[derive(Default)]
struct Counters {
    copied: AtomicU64,
    moved: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn count(&self, status: LeafStatus) {
        let counter = match status {
            LeafStatus::Copied => &self.copied,
            LeafStatus::Moved => &self.moved,
            LeafStatus::Skipped => &self.skipped,
            LeafStatus::Error => &self.errors,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Forwards executor notifications to the reporter and remembers how many
/// bytes of the leaf were counted.
struct LeafProgress<'r, 'a> {
    reporter: &'r Reporter<'a>,
    counted: std::cell::Cell<u64>,
}

impl LeafObserver for LeafProgress<'_, '_> {
    fn copied(&self, bytes: u64) {
        self.counted.set(self.counted.get() + bytes);
        self.reporter.add_bytes(bytes);
    }

    fn verifying(&self, leaf: &FileLeaf) {
        self.reporter.verifying(&leaf.source_path);
    }
}

/// Leaves bound for one destination path take turns writing it, in the order
/// they claimed it. Staging names are derived from the destination, so two
/// writers must never overlap.
#[derive(Default)]
struct Turns {
    issued: AtomicU64,
    serving: Mutex<u64>,
    advanced: Condvar,
}

/// Held while a leaf writes its destination. Dropping it admits the next claimant.
struct Turn(Arc<Turns>);

impl Turns {
    fn issue(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst)
    }

    fn wait(self: Arc<Self>, ticket: u64) -> Turn {
        {
            let mut serving = self.serving.lock().unwrap_or_else(|p| p.into_inner());
            while *serving != ticket {
                serving = self.advanced.wait(serving).unwrap_or_else(|p| p.into_inner());
            }
        }
        Turn(self)
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        let mut serving = self.0.serving.lock().unwrap_or_else(|p| p.into_inner());
        *serving += 1;
        self.0.advanced.notify_all();
    }
}

/// State shared by the workers of one session.
struct Pool<'a> {
    options: &'a TransferOptions,
    session_dir: &'a Path,
    cancel: &'a CancelToken,
    executor: Executor,
    reporter: Reporter<'a>,
    manifest: ManifestWriter,
    claims: Mutex<HashMap<PathBuf, Arc<Turns>>>,
    counters: Counters,
    aborted: AtomicBool,
    fatal: Mutex<Option<FatalSessionError>>,
}

impl Pool<'_> {
    fn stopping(&self) -> bool {
        self.cancel.is_cancelled() || self.aborted.load(Ordering::SeqCst)
    }

    fn process(&self, index: u64, leaf: &FileLeaf) {
        // The dispatcher may have been blocked handing this leaf over when
        // the session was cancelled or aborted.
        if self.stopping() {
            return;
        }
        self.reporter.dispatched(index, &leaf.source_path);

        if !self.session_dir.is_dir() {
            self.abort(FatalSessionError::DestinationLost {
                path: self.session_dir.to_path_buf(),
            });
            return;
        }

        let candidate = self.session_dir.join(destination_relative(leaf, self.options));
        let claim = {
            let mut claims = self.claims.lock().unwrap_or_else(|p| p.into_inner());
            let resolution = resolve_against(&candidate, self.options.conflict_policy, |p| {
                claims.contains_key(p)
            });
            match resolution {
                Resolution::Skip => None,
                Resolution::Proceed(dest) => {
                    let turns = Arc::clone(claims.entry(dest.clone()).or_default());
                    let ticket = turns.issue();
                    Some((dest, turns, ticket))
                }
            }
        };

        let observer = LeafProgress {
            reporter: &self.reporter,
            counted: std::cell::Cell::new(0),
        };
        let Executed { entry, outcome } = match claim {
            None => {
                debug!("{} exists, skipping", candidate.display());
                skipped_entry(leaf, &candidate)
            }
            Some((dest, turns, ticket)) => {
                let _turn = turns.wait(ticket);
                self.executor.execute(
                    leaf,
                    &dest,
                    self.options.copy_mode,
                    self.options.verify_mode,
                    &observer,
                )
            }
        };

        // Skipped and failed leaves still count towards the byte total.
        self.reporter
            .add_bytes(leaf.size_bytes.saturating_sub(observer.counted.get()));
        self.counters.count(entry.status);

        if let LeafOutcome::Error(e) = &outcome {
            if self.destination_lost(e) {
                self.abort(FatalSessionError::DestinationLost {
                    path: self.session_dir.to_path_buf(),
                });
            }
        }
        if let Err(e) = self.manifest.record(&entry) {
            self.abort(e);
        }
    }

    fn destination_lost(&self, err: &LeafError) -> bool {
        if !self.session_dir.is_dir() {
            return true;
        }
        match err {
            LeafError::Io { path, source, .. } => {
                path.starts_with(self.session_dir) && is_device_gone(source)
            }
            _ => false,
        }
    }

    /// Stop dispatching. The first fatal cause wins.
    fn abort(&self, cause: FatalSessionError) {
        let mut fatal = self.fatal.lock().unwrap_or_else(|p| p.into_inner());
        if fatal.is_none() {
            error!("aborting session: {}", cause);
            *fatal = Some(cause);
        }
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn take_fatal(&self) -> Option<FatalSessionError> {
        self.fatal.lock().unwrap_or_else(|p| p.into_inner()).take()
    }
}

/// Run one session to a terminal phase.
///
/// Returns `Rejected` if the session cannot start (nothing has been written
/// then), `Aborted` with a partial summary if it had to stop midway.
pub fn run_session(
    items: &[PickedItem],
    options: &TransferOptions,
    ctx: &SessionContext<'_>,
) -> Result<TransferSummary, EngineError> {
    let started_at = Local::now();
    ctx.sink.on_progress(&TransferProgress::scanning());

    if !options.dest_mount_point.is_dir() {
        return Err(FatalSessionError::DestinationMissing {
            path: options.dest_mount_point.clone(),
        }
        .into());
    }

    let leaves = expand(items, ctx.config.workers());
    let total_files = leaves.len() as u64;
    let total_bytes: u64 = leaves.iter().map(|l| l.size_bytes).sum();

    if ctx.cancel.is_cancelled() {
        info!("session cancelled before copying");
        let mut progress = TransferProgress::scanning();
        progress.phase = Phase::Cancelled;
        progress.total_files = total_files;
        progress.bytes_total = total_bytes;
        ctx.sink.on_progress(&progress);
        return Ok(summarize(
            Phase::Cancelled,
            started_at,
            total_files,
            total_bytes,
            &Counters::default(),
            PathBuf::new(),
        ));
    }

    let margin = ctx.config.space_safety_margin_bytes;
    let available = ctx
        .probe
        .available_bytes(&options.dest_mount_point)
        .map_err(|source| FatalSessionError::SpaceQuery {
            path: options.dest_mount_point.clone(),
            source,
        })?;
    if !fits(total_bytes, available, margin) {
        return Err(FatalSessionError::InsufficientSpace {
            required: total_bytes.saturating_add(margin),
            available,
            margin,
        }
        .into());
    }

    let paths = create_session_dir(options, started_at)?;
    write_housekeeping(&paths);
    let manifest = ManifestWriter::create(&paths.session_dir)?;
    let session_id = Uuid::new_v4();
    info!(
        "session {} started: {} files, {} bytes -> {} ({} {}, verify {})",
        session_id,
        total_files,
        total_bytes,
        paths.session_dir.display(),
        options.copy_mode,
        options.conflict_policy,
        options.verify_mode
    );

    let pool = Pool {
        options,
        session_dir: &paths.session_dir,
        cancel: ctx.cancel,
        executor: Executor::new(ctx.config.copy_buffer_size, ctx.config.verify_retries),
        reporter: Reporter::new(ctx.sink, ctx.config.progress_interval, total_files, total_bytes),
        manifest,
        claims: Mutex::new(HashMap::new()),
        counters: Counters::default(),
        aborted: AtomicBool::new(false),
        fatal: Mutex::new(None),
    };
    pool.reporter.set_phase(Phase::Copying);

    // Rendezvous channel: a leaf only counts as dispatched once a worker took it
    // and found the session still running.
    let workers = ctx.config.workers().min(leaves.len().max(1));
    let (tx, rx) = crossbeam_channel::bounded::<(u64, &FileLeaf)>(0);
    thread::scope(|scope| {
        for _ in 0..workers {
            let rx = rx.clone();
            let pool = &pool;
            scope.spawn(move || {
                while let Ok((index, leaf)) = rx.recv() {
                    pool.process(index, leaf);
                }
            });
        }
        drop(rx);

        for (i, leaf) in leaves.iter().enumerate() {
            if pool.stopping() {
                break;
            }
            if tx.send((i as u64 + 1, leaf)).is_err() {
                break;
            }
        }
        drop(tx);
    });

    let fatal = pool.take_fatal();
    let phase = if fatal.is_some() {
        Phase::Error
    } else if ctx.cancel.is_cancelled() {
        Phase::Cancelled
    } else {
        Phase::Done
    };
    let mut summary = summarize(
        phase,
        started_at,
        total_files,
        total_bytes,
        &pool.counters,
        paths.session_dir.clone(),
    );

    let fatal = match pool.manifest.finish(session_id, &summary) {
        Ok(path) => {
            debug!("manifest written to {}", path.display());
            fatal
        }
        Err(e) if fatal.is_some() => {
            warn!("{}", e);
            fatal
        }
        Err(e) => {
            error!("{}", e);
            summary.phase = Phase::Error;
            Some(e)
        }
    };

    pool.reporter.set_phase(summary.phase);
    info!(
        "session {} {}: {} copied, {} moved, {} skipped, {} failed of {}",
        session_id,
        summary.phase,
        summary.copied_files,
        summary.moved_files,
        summary.skipped_files,
        summary.error_files,
        summary.total_files
    );

    match fatal {
        Some(cause) => Err(EngineError::Aborted {
            cause,
            summary: Box::new(summary),
        }),
        None => Ok(summary),
    }
}

fn summarize(
    phase: Phase,
    started_at: DateTime<Local>,
    total_files: u64,
    total_bytes: u64,
    counters: &Counters,
    output_session_dir: PathBuf,
) -> TransferSummary {
    let finished_at = Local::now();
    TransferSummary {
        phase,
        started_at,
        finished_at,
        duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
        total_files,
        total_bytes,
        copied_files: counters.copied.load(Ordering::SeqCst),
        moved_files: counters.moved.load(Ordering::SeqCst),
        skipped_files: counters.skipped.load(Ordering::SeqCst),
        error_files: counters.errors.load(Ordering::SeqCst),
        output_session_dir,
    }
}
