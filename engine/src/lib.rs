//! # Offload Engine - Removable Drive Transfer Library
//!
//! A headless engine for offloading files and folders onto an external drive.
//! Designed as the foundation for multiple front ends (CLI, desktop, automation).
//!
//! ## Overview
//!
//! The engine provides:
//! - Expansion of queued files and folders into individual leaves
//! - A read-only preflight: totals, per-category breakdown, free-space fit
//! - Parallel copy or move with size or SHA-256 verification
//! - Conflict policies (rename, overwrite, skip) that never clobber a file by accident
//! - Progress snapshots pushed into a caller-supplied sink
//! - A manifest journal written as the transfer runs
//!
//! ## Basic Usage
//!
//! ```no_run
//! use offload_engine::{Engine, EngineConfig, PickedItem, TransferOptions, VerifyMode};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::new(EngineConfig::default());
//! let items = vec![PickedItem::folder("/home/me/Pictures/trip")];
//!
//! // Check that everything fits first
//! let preflight = engine.preflight_scan(&items, "/media/usb".as_ref());
//! println!("{} files, {} bytes, fits: {}", preflight.total_files, preflight.total_bytes, preflight.will_fit);
//!
//! // Copy, verifying every file by digest
//! let mut options = TransferOptions::new("/media/usb");
//! options.verify_mode = VerifyMode::Sha256;
//! let summary = engine.start_transfer(&items, &options, &|p: &offload_engine::TransferProgress| {
//!     println!("{:.1}% {}", p.percent, p.current_path);
//! })?;
//!
//! println!("{} copied, {} failed", summary.copied_files, summary.error_files);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (items, leaves, options, progress, summary)
//! - **error**: Per-leaf, fatal and API error types
//! - **config**: Engine tuning knobs
//! - **category**: Extension to category table
//! - **expand**: Folder walking
//! - **preflight**: Size and fit report
//! - **volumes**: Mounted volumes and free space
//! - **conflict**: Destination name conflicts
//! - **checksums**: SHA-256 helpers
//! - **fs_ops**: Low-level filesystem operations
//! - **executor**: Copy/move/verify of one leaf
//! - **manifest**: Per-session manifest journal
//! - **progress**: Progress sinks and throttling
//! - **cancel**: Cancellation token
//! - **session**: Session orchestration and destination layout
//! - **queue**: Transfer queue
//! - **api**: The `Engine` facade

pub mod api;
pub mod cancel;
pub mod category;
pub mod checksums;
pub mod config;
pub mod conflict;
pub mod error;
pub mod executor;
pub mod expand;
pub mod fs_ops;
pub mod manifest;
pub mod model;
pub mod preflight;
pub mod progress;
pub mod queue;
pub mod session;
pub mod volumes;

// Re-export main types and functions
pub use api::Engine;
pub use cancel::CancelToken;
pub use category::Category;
pub use config::EngineConfig;
pub use error::{EngineError, FatalSessionError, LeafError};
pub use manifest::{read_manifest, read_manifest_journal, Manifest, JOURNAL_FILE, MANIFEST_FILE};
pub use model::{
    ConflictPolicy, CopyMode, FileLeaf, ItemKind, LeafStatus, ManifestEntry, Phase, PickedItem,
    Preflight, PreflightStamp, QueueItem, TransferOptions, TransferProgress, TransferSummary,
    VerifyMode, VolumeInfo,
};
pub use progress::{ChannelSink, NullSink, ProgressSink};
pub use queue::TransferQueue;
pub use volumes::{FixedSpaceProbe, SpaceProbe, SystemSpaceProbe};
