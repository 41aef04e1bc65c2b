//! The operator's transfer queue.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::model::{ItemKind, PickedItem, Preflight, QueueItem};

/// Turn raw dropped paths into queue items. Blank entries are ignored;
/// directories become folder items, everything else a file item.
pub fn items_from_paths<I, P>(paths: I) -> Vec<QueueItem>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    paths
        .into_iter()
        .filter(|p| !p.as_ref().as_os_str().to_string_lossy().trim().is_empty())
        .map(|p| {
            let path = p.as_ref();
            match std::fs::metadata(path) {
                Ok(meta) if meta.is_dir() => QueueItem::new(ItemKind::Folder, path),
                Ok(meta) => {
                    let mut item = QueueItem::new(ItemKind::File, path);
                    item.size_bytes = Some(meta.len());
                    item
                }
                Err(_) => QueueItem::new(ItemKind::File, path),
            }
        })
        .collect()
}

/// Ordered list of queued items, unique by path.
///
/// Every mutation bumps `revision`, which is how a stale preflight is detected.
#[derive(Debug, Clone, Default)]
pub struct TransferQueue {
    items: Vec<QueueItem>,
    revision: u64,
}

impl TransferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `item` unless its path is already queued.
    pub fn add(&mut self, item: QueueItem) -> bool {
        if self.contains_path(&item.path) {
            return false;
        }
        self.items.push(item);
        self.revision += 1;
        true
    }

    /// Add dropped paths; returns the items that were actually added.
    pub fn add_paths<I, P>(&mut self, paths: I) -> Vec<QueueItem>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        items_from_paths(paths)
            .into_iter()
            .filter(|item| self.add(item.clone()))
            .collect()
    }

    pub fn remove(&mut self, id: Uuid) -> Option<QueueItem> {
        let pos = self.items.iter().position(|i| i.id == id)?;
        self.revision += 1;
        Some(self.items.remove(pos))
    }

    pub fn clear(&mut self) {
        if !self.items.is_empty() {
            self.items.clear();
            self.revision += 1;
        }
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        self.items.iter().any(|i| i.path == path)
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn picked(&self) -> Vec<PickedItem> {
        self.items.iter().map(PickedItem::from).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Tag `preflight` with the current revision.
    pub fn stamp(&self, mut preflight: Preflight) -> Preflight {
        preflight.stamp.queue_revision = Some(self.revision);
        preflight
    }

    /// Whether `preflight` was computed for this exact queue and destination.
    pub fn is_current(&self, preflight: &Preflight, dest_mount_point: &Path) -> bool {
        preflight.stamp.queue_revision == Some(self.revision)
            && preflight.stamp.dest_mount_point == dest_mount_point
    }

    /// Source paths in queue order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.items.iter().map(|i| i.path.clone()).collect()
    }
}
