//! Core data model for transfer sessions.
//!
//! This module defines the structures exchanged with the engine's callers:
//! - PickedItem / QueueItem: what the operator queued
//! - FileLeaf: a concrete file produced by expanding the queue
//! - TransferOptions and the mode/policy enums controlling a session
//! - Preflight, ManifestEntry, TransferProgress, TransferSummary: what the engine reports

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::category::Category;

/// Default name of the directory created at the root of the destination volume.
pub const DEFAULT_ROOT_DIR_NAME: &str = "Transfers";

/// Whether a queued path is a single file or a folder to expand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKind::File => write!(f, "file"),
            ItemKind::Folder => write!(f, "folder"),
        }
    }
}

/// A `{kind, path}` pair as handed over by the ingestion layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickedItem {
    pub kind: ItemKind,
    pub path: PathBuf,
}

impl PickedItem {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        PickedItem {
            kind: ItemKind::File,
            path: path.into(),
        }
    }

    pub fn folder(path: impl Into<PathBuf>) -> Self {
        PickedItem {
            kind: ItemKind::Folder,
            path: path.into(),
        }
    }
}

/// An entry in the transfer queue.
///
/// Identity is the source path: the queue never holds two items with the same path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Random identifier, stable for the lifetime of the queue entry
    pub id: Uuid,

    /// File or folder
    pub kind: ItemKind,

    /// Source path as picked by the operator
    pub path: PathBuf,

    /// Size of a file pick, when known
    pub size_bytes: Option<u64>,

    /// Number of files below a folder pick, when known
    pub file_count: Option<u64>,
}

impl QueueItem {
    pub fn new(kind: ItemKind, path: impl Into<PathBuf>) -> Self {
        QueueItem {
            id: Uuid::new_v4(),
            kind,
            path: path.into(),
            size_bytes: None,
            file_count: None,
        }
    }

    pub fn picked(&self) -> PickedItem {
        PickedItem {
            kind: self.kind,
            path: self.path.clone(),
        }
    }
}

impl From<&QueueItem> for PickedItem {
    fn from(item: &QueueItem) -> Self {
        item.picked()
    }
}

/// A single concrete file produced by expanding a queued item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLeaf {
    /// Full source path
    pub source_path: PathBuf,

    /// Size in bytes at expansion time (0 when the path could not be read)
    pub size_bytes: u64,

    /// Category derived from the extension
    pub category: Category,

    /// Lowercased extension without the dot, or "noext"
    pub extension: String,

    /// `<folder name>/<relative path>` for leaves found below a folder pick
    pub folder_rel: Option<PathBuf>,

    /// Why this leaf could not be read during expansion, if it could not
    pub problem: Option<String>,
}

impl FileLeaf {
    pub fn is_readable(&self) -> bool {
        self.problem.is_none()
    }

    pub fn file_name(&self) -> &std::ffi::OsStr {
        self.source_path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("file"))
    }
}

/// The operation mode for a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyMode {
    /// Copy files; sources remain unchanged
    #[default]
    Copy,
    /// Copy, verify, then delete the source
    Move,
}

impl fmt::Display for CopyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyMode::Copy => write!(f, "copy"),
            CopyMode::Move => write!(f, "move"),
        }
    }
}

impl FromStr for CopyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "copy" => Ok(CopyMode::Copy),
            "move" => Ok(CopyMode::Move),
            other => Err(format!("invalid copy mode '{other}', expected 'copy' or 'move'")),
        }
    }
}

/// Policy for handling a destination path that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Pick a free name by appending ` (N)` before the extension
    #[default]
    Rename,
    /// Replace the existing file
    Overwrite,
    /// Leave the existing file alone and count the leaf as skipped
    Skip,
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicy::Rename => write!(f, "rename"),
            ConflictPolicy::Overwrite => write!(f, "overwrite"),
            ConflictPolicy::Skip => write!(f, "skip"),
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rename" => Ok(ConflictPolicy::Rename),
            "overwrite" => Ok(ConflictPolicy::Overwrite),
            "skip" => Ok(ConflictPolicy::Skip),
            other => Err(format!(
                "invalid conflict policy '{other}', expected 'rename', 'overwrite' or 'skip'"
            )),
        }
    }
}

/// Post-copy integrity check strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyMode {
    None,
    /// Compare byte counts
    #[default]
    Size,
    /// Compare SHA-256 digests of source and destination
    Sha256,
}

impl fmt::Display for VerifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyMode::None => write!(f, "none"),
            VerifyMode::Size => write!(f, "size"),
            VerifyMode::Sha256 => write!(f, "sha256"),
        }
    }
}

impl FromStr for VerifyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(VerifyMode::None),
            "size" => Ok(VerifyMode::Size),
            "sha256" => Ok(VerifyMode::Sha256),
            other => Err(format!(
                "invalid verify mode '{other}', expected 'none', 'size' or 'sha256'"
            )),
        }
    }
}

/// Options for one transfer session. Immutable once the session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOptions {
    /// Mount point of the destination volume
    pub dest_mount_point: PathBuf,

    /// Directory created below the mount point to hold all sessions
    pub dest_root_dir_name: String,

    pub copy_mode: CopyMode,
    pub conflict_policy: ConflictPolicy,
    pub verify_mode: VerifyMode,

    /// Nest the session directory under a per-day directory
    pub group_by_date: bool,

    /// Sort leaves into category folders (`Images/`, `Documents/`, ...)
    pub group_by_type: bool,

    /// Keep the relative tree of folder picks instead of flattening them
    pub preserve_folder_structure: bool,
}

impl TransferOptions {
    pub fn new(dest_mount_point: impl Into<PathBuf>) -> Self {
        TransferOptions {
            dest_mount_point: dest_mount_point.into(),
            ..Default::default()
        }
    }

    pub fn move_instead_of_copy(&self) -> bool {
        self.copy_mode == CopyMode::Move
    }

    pub fn root_dir(&self) -> PathBuf {
        self.dest_mount_point.join(&self.dest_root_dir_name)
    }
}

impl Default for TransferOptions {
    fn default() -> Self {
        TransferOptions {
            dest_mount_point: PathBuf::new(),
            dest_root_dir_name: DEFAULT_ROOT_DIR_NAME.to_string(),
            copy_mode: CopyMode::Copy,
            conflict_policy: ConflictPolicy::Rename,
            verify_mode: VerifyMode::Size,
            group_by_date: false,
            group_by_type: true,
            preserve_folder_structure: true,
        }
    }
}

/// Identifies the queue snapshot and destination a preflight was computed for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightStamp {
    pub queue_revision: Option<u64>,
    pub dest_mount_point: PathBuf,
}

/// Capacity and composition report for a queue against a destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preflight {
    pub total_files: u64,
    pub total_folders: u64,
    pub total_bytes: u64,
    pub dest_avail_bytes: u64,
    pub will_fit: bool,

    /// Leaves that could not be read during expansion (included in `total_files`)
    pub unreadable_files: u64,

    /// Category name to file count
    pub by_category: BTreeMap<String, u64>,

    /// `.ext` to file count
    pub by_extension: BTreeMap<String, u64>,

    pub stamp: PreflightStamp,
}

/// Final state of a single leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafStatus {
    Copied,
    Moved,
    Skipped,
    Error,
}

impl fmt::Display for LeafStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeafStatus::Copied => write!(f, "copied"),
            LeafStatus::Moved => write!(f, "moved"),
            LeafStatus::Skipped => write!(f, "skipped"),
            LeafStatus::Error => write!(f, "error"),
        }
    }
}

/// One durable record describing what happened to a leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
    pub size_bytes: u64,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub status: LeafStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Hex SHA-256 of the source, when computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Session phase as reported in progress snapshots and the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Scanning,
    Copying,
    Verifying,
    Done,
    Cancelled,
    Error,
}

impl Phase {
    /// Returns true if no further transitions are expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Cancelled | Phase::Error)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Scanning => "scanning",
            Phase::Copying => "copying",
            Phase::Verifying => "verifying",
            Phase::Done => "done",
            Phase::Cancelled => "cancelled",
            Phase::Error => "error",
        };
        f.write_str(s)
    }
}

/// A progress snapshot pushed to the caller's sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferProgress {
    pub phase: Phase,
    /// 1-based index of the most recently dispatched leaf
    pub current_file: u64,
    pub total_files: u64,
    pub current_path: String,
    pub bytes_done: u64,
    pub bytes_total: u64,
    /// 0..=100
    pub percent: f64,
}

impl TransferProgress {
    pub fn scanning() -> Self {
        TransferProgress {
            phase: Phase::Scanning,
            current_file: 0,
            total_files: 0,
            current_path: String::new(),
            bytes_done: 0,
            bytes_total: 0,
            percent: 0.0,
        }
    }
}

/// Percentage of `done` over `total`, clamped to 0..=100.
pub fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        ((done as f64) / (total as f64) * 100.0).clamp(0.0, 100.0)
    }
}

/// Outcome of a whole session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferSummary {
    /// Terminal phase: done, cancelled or error
    pub phase: Phase,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub duration_ms: u64,
    pub total_files: u64,
    pub total_bytes: u64,
    pub copied_files: u64,
    pub moved_files: u64,
    pub skipped_files: u64,
    pub error_files: u64,
    pub output_session_dir: PathBuf,
}

impl TransferSummary {
    /// Number of leaves that reached a final status.
    pub fn processed_files(&self) -> u64 {
        self.copied_files + self.moved_files + self.skipped_files + self.error_files
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_session_dir.join(crate::manifest::MANIFEST_FILE)
    }

    pub fn session_dir(&self) -> &Path {
        &self.output_session_dir
    }
}

/// A mounted volume that can serve as destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub name: String,
    pub mount_point: PathBuf,
    pub fs_type: Option<String>,
    pub total_bytes: u64,
    pub avail_bytes: u64,
    pub removable: Option<bool>,
}
