//! Path expansion.
//!
//! Turns queued file/folder picks into a flat list of `FileLeaf`s. Folder picks
//! are walked depth-first without following symlinks. A path that cannot be read
//! becomes a leaf carrying a `problem` instead of failing the whole expansion.

use std::path::{Path, PathBuf};
use std::thread;

use log::warn;
use walkdir::WalkDir;

use crate::category::classify;
use crate::model::{FileLeaf, ItemKind, PickedItem};

/// Expand all items, preserving queue order.
///
/// Top-level items are split into at most `threads` contiguous chunks, each
/// walked on its own scoped thread. Chunks are concatenated in queue order so
/// the output is stable for a fixed filesystem snapshot.
pub fn expand(items: &[PickedItem], threads: usize) -> Vec<FileLeaf> {
    let threads = threads.clamp(1, items.len().max(1));
    if threads == 1 {
        return items.iter().flat_map(expand_item).collect();
    }

    let chunk_len = items.len().div_ceil(threads);
    thread::scope(|scope| {
        let handles: Vec<_> = items
            .chunks(chunk_len)
            .map(|chunk| {
                let handle = scope.spawn(move || chunk.iter().flat_map(expand_item).collect::<Vec<_>>());
                (handle, chunk)
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|(handle, chunk)| {
                handle.join().unwrap_or_else(|_| {
                    chunk
                        .iter()
                        .map(|item| problem_leaf(&item.path, None, "expansion panicked".to_string()))
                        .collect()
                })
            })
            .collect()
    })
}

/// Expand a single queued item.
pub fn expand_item(item: &PickedItem) -> Vec<FileLeaf> {
    match item.kind {
        ItemKind::File => vec![expand_file(&item.path)],
        ItemKind::Folder => expand_folder(&item.path),
    }
}

fn expand_file(path: &Path) -> FileLeaf {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => leaf(path.to_path_buf(), meta.len(), None),
        Ok(_) => problem_leaf(path, None, "not a regular file".to_string()),
        Err(e) => problem_leaf(path, None, e.to_string()),
    }
}

fn expand_folder(root: &Path) -> Vec<FileLeaf> {
    let folder_base = root
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("Folder"));

    match std::fs::metadata(root) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return vec![problem_leaf(root, None, "not a directory".to_string())],
        Err(e) => return vec![problem_leaf(root, None, e.to_string())],
    }

    let mut out = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        match entry {
            Ok(entry) => {
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = folder_base.join(entry.path().strip_prefix(root).unwrap_or(entry.path()));
                match entry.metadata() {
                    Ok(meta) => out.push(leaf(entry.into_path(), meta.len(), Some(rel))),
                    Err(e) => out.push(problem_leaf(entry.path(), Some(rel), e.to_string())),
                }
            }
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                warn!("skipping unreadable entry {}: {}", path.display(), e);
                let rel = path
                    .strip_prefix(root)
                    .ok()
                    .map(|inner| folder_base.join(inner));
                out.push(problem_leaf(&path, rel, e.to_string()));
            }
        }
    }

    out
}

fn leaf(source_path: PathBuf, size_bytes: u64, folder_rel: Option<PathBuf>) -> FileLeaf {
    let (category, extension) = classify(&source_path);
    FileLeaf {
        source_path,
        size_bytes,
        category,
        extension,
        folder_rel,
        problem: None,
    }
}

fn problem_leaf(path: &Path, folder_rel: Option<PathBuf>, problem: String) -> FileLeaf {
    let mut leaf = leaf(path.to_path_buf(), 0, folder_rel);
    leaf.problem = Some(problem);
    leaf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Category;
    use std::fs;

    #[test]
    fn test_expand_file_and_nested_folder() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let album = temp_dir.path().join("album");
        fs::create_dir_all(album.join("raw")).unwrap();
        fs::write(album.join("b.png"), b"png!").unwrap();
        fs::write(album.join("a.jpg"), b"jpeg").unwrap();
        fs::write(album.join("raw").join("c.txt"), b"notes").unwrap();
        let loose = temp_dir.path().join("loose.pdf");
        fs::write(&loose, b"%PDF-1.7").unwrap();

        let leaves = expand(&[PickedItem::folder(&album), PickedItem::file(&loose)], 4);

        let names: Vec<_> = leaves
            .iter()
            .map(|l| l.source_path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, ["a.jpg", "b.png", "c.txt", "loose.pdf"]);
        assert_eq!(leaves[0].folder_rel, Some(PathBuf::from("album/a.jpg")));
        assert_eq!(leaves[2].folder_rel, Some(PathBuf::from("album/raw/c.txt")));
        assert_eq!(leaves[3].folder_rel, None);
        assert_eq!(leaves[3].category, Category::Documents);
        assert_eq!(leaves.iter().map(|l| l.size_bytes).sum::<u64>(), 4 + 4 + 5 + 8);
        assert!(leaves.iter().all(FileLeaf::is_readable));
    }

    #[test]
    fn test_missing_path_becomes_problem_leaf() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let present = temp_dir.path().join("present.txt");
        fs::write(&present, b"here").unwrap();

        let leaves = expand(&[
            PickedItem::file(temp_dir.path().join("gone.txt")),
            PickedItem::folder(temp_dir.path().join("gone_dir")),
            PickedItem::file(&present),
        ], 2);

        assert_eq!(leaves.len(), 3);
        assert!(leaves[0].problem.is_some());
        assert!(leaves[1].problem.is_some());
        assert_eq!(leaves[0].size_bytes, 0);
        assert!(leaves[2].is_readable());
    }

    #[test]
    fn test_empty_folder_expands_to_nothing() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let empty = temp_dir.path().join("empty");
        fs::create_dir(&empty).unwrap();
        assert!(expand(&[PickedItem::folder(&empty)], 1).is_empty());
    }

    #[test]
    fn test_many_items_keep_queue_order_across_fewer_threads() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let items: Vec<_> = (0..50)
            .map(|i| {
                let path = temp_dir.path().join(format!("f{i:02}.txt"));
                fs::write(&path, b"x").unwrap();
                PickedItem::file(path)
            })
            .collect();

        for threads in [1, 3, 8, 200] {
            let leaves = expand(&items, threads);
            assert_eq!(leaves.len(), 50);
            for (i, leaf) in leaves.iter().enumerate() {
                assert!(leaf.source_path.ends_with(format!("f{i:02}.txt")));
            }
        }
        assert!(expand(&[], 0).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dir = temp_dir.path().join("dir");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("real.txt"), b"x").unwrap();
        std::os::unix::fs::symlink(&dir, dir.join("loop")).unwrap();

        let leaves = expand(&[PickedItem::folder(&dir)], 1);
        assert_eq!(leaves.len(), 1);
        assert!(leaves[0].source_path.ends_with("real.txt"));
    }
}
