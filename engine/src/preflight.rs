//! Preflight scanning: what is queued, how big it is, and whether it fits.
//!
//! The scan never writes to the filesystem and never reserves space, so it is
//! safe to re-run on every queue or destination change.

use std::collections::BTreeMap;
use std::path::Path;

use crate::config::EngineConfig;
use crate::expand::expand;
use crate::model::{FileLeaf, ItemKind, PickedItem, Preflight, PreflightStamp};
use crate::volumes::SpaceProbe;

/// Scan `items` against the destination at `dest_mount_point`.
///
/// A destination whose free space cannot be queried reports 0 bytes available
/// (and therefore does not fit unless the queue is empty).
pub fn scan(
    items: &[PickedItem],
    dest_mount_point: &Path,
    probe: &dyn SpaceProbe,
    config: &EngineConfig,
) -> Preflight {
    let leaves = expand(items, config.workers());
    let dest_avail_bytes = match probe.available_bytes(dest_mount_point) {
        Ok(avail) => avail,
        Err(e) => {
            log::warn!(
                "free space unavailable for {}: {}",
                dest_mount_point.display(),
                e
            );
            0
        }
    };
    summarize(
        items,
        &leaves,
        dest_mount_point,
        dest_avail_bytes,
        config.space_safety_margin_bytes,
    )
}

/// Build a `Preflight` from an already expanded leaf list.
pub fn summarize(
    items: &[PickedItem],
    leaves: &[FileLeaf],
    dest_mount_point: &Path,
    dest_avail_bytes: u64,
    margin: u64,
) -> Preflight {
    let mut total_bytes: u64 = 0;
    let mut unreadable_files = 0;
    let mut by_category: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_extension: BTreeMap<String, u64> = BTreeMap::new();

    for leaf in leaves {
        if !leaf.is_readable() {
            unreadable_files += 1;
            continue;
        }
        total_bytes = total_bytes.saturating_add(leaf.size_bytes);
        *by_category.entry(leaf.category.to_string()).or_insert(0) += 1;
        *by_extension.entry(format!(".{}", leaf.extension)).or_insert(0) += 1;
    }

    Preflight {
        total_files: leaves.len() as u64,
        total_folders: items.iter().filter(|i| i.kind == ItemKind::Folder).count() as u64,
        total_bytes,
        dest_avail_bytes,
        will_fit: fits(total_bytes, dest_avail_bytes, margin),
        unreadable_files,
        by_category,
        by_extension,
        stamp: PreflightStamp {
            queue_revision: None,
            dest_mount_point: dest_mount_point.to_path_buf(),
        },
    }
}

/// The fit rule shared by preflight and session start.
pub fn fits(total_bytes: u64, avail_bytes: u64, margin: u64) -> bool {
    avail_bytes >= total_bytes.saturating_add(margin)
}
