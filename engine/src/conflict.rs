//! Conflict resolution for destination paths that already exist.

use std::path::{Path, PathBuf};

use crate::model::ConflictPolicy;

/// Upper bound on rename attempts before giving up on a name.
pub const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Decision for one candidate destination path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Write to this path
    Proceed(PathBuf),
    /// Leave the existing file alone
    Skip,
}

/// Decide where a leaf goes given the candidate path and the policy.
///
/// Only existence by path is considered; contents are never compared.
pub fn resolve(candidate: &Path, policy: ConflictPolicy) -> Resolution {
    resolve_against(candidate, policy, |_| false)
}

/// Like [`resolve`], but also treats `claimed` paths as existing.
///
/// `claimed` answers for paths already assigned to earlier leaves of the same
/// session, which may not have reached the disk yet.
pub fn resolve_against(
    candidate: &Path,
    policy: ConflictPolicy,
    claimed: impl Fn(&Path) -> bool,
) -> Resolution {
    let taken = |p: &Path| claimed(p) || exists(p);

    if !taken(candidate) {
        return Resolution::Proceed(candidate.to_path_buf());
    }

    match policy {
        ConflictPolicy::Overwrite => Resolution::Proceed(candidate.to_path_buf()),
        ConflictPolicy::Skip => Resolution::Skip,
        ConflictPolicy::Rename => Resolution::Proceed(free_name(candidate, &taken)),
    }
}

/// First `stem (N).ext` next to `dest` that is not taken.
fn free_name(dest: &Path, taken: &dyn Fn(&Path) -> bool) -> PathBuf {
    let stem = dest
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let ext = dest.extension().map(|s| s.to_string_lossy().to_string());
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));

    for i in 1..=MAX_RENAME_ATTEMPTS {
        let name = match &ext {
            Some(ext) => format!("{stem} ({i}).{ext}"),
            None => format!("{stem} ({i})"),
        };
        let candidate = parent.join(name);
        if !taken(&candidate) {
            return candidate;
        }
    }

    // Out of ordinals: fall back to a name that cannot collide in practice.
    let unique = uuid::Uuid::new_v4().simple().to_string();
    match &ext {
        Some(ext) => parent.join(format!("{stem} ({unique}).{ext}")),
        None => parent.join(format!("{stem} ({unique})")),
    }
}

/// Existence without following symlinks: a dangling link still occupies the name.
fn exists(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;

    #[test]
    fn test_free_path_proceeds_under_every_policy() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dest = temp_dir.path().join("photo.jpg");
        for policy in [ConflictPolicy::Rename, ConflictPolicy::Overwrite, ConflictPolicy::Skip] {
            assert_eq!(resolve(&dest, policy), Resolution::Proceed(dest.clone()));
        }
    }

    #[test]
    fn test_rename_appends_ordinal_before_extension() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dest = temp_dir.path().join("photo.jpg");
        fs::write(&dest, b"1").unwrap();
        fs::write(temp_dir.path().join("photo (1).jpg"), b"2").unwrap();

        let resolved = resolve(&dest, ConflictPolicy::Rename);
        assert_eq!(
            resolved,
            Resolution::Proceed(temp_dir.path().join("photo (2).jpg"))
        );
    }

    #[test]
    fn test_rename_without_extension() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dest = temp_dir.path().join("README");
        fs::write(&dest, b"x").unwrap();
        assert_eq!(
            resolve(&dest, ConflictPolicy::Rename),
            Resolution::Proceed(temp_dir.path().join("README (1)"))
        );
    }

    #[test]
    fn test_overwrite_and_skip_on_existing() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dest = temp_dir.path().join("doc.pdf");
        fs::write(&dest, b"x").unwrap();
        assert_eq!(
            resolve(&dest, ConflictPolicy::Overwrite),
            Resolution::Proceed(dest.clone())
        );
        assert_eq!(resolve(&dest, ConflictPolicy::Skip), Resolution::Skip);
    }

    #[test]
    fn test_claimed_paths_count_as_existing() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dest = temp_dir.path().join("IMG_0001.jpg");
        let mut claimed = HashSet::new();
        claimed.insert(dest.clone());
        claimed.insert(temp_dir.path().join("IMG_0001 (1).jpg"));

        assert_eq!(
            resolve_against(&dest, ConflictPolicy::Rename, |p| claimed.contains(p)),
            Resolution::Proceed(temp_dir.path().join("IMG_0001 (2).jpg"))
        );
        assert_eq!(
            resolve_against(&dest, ConflictPolicy::Overwrite, |p| claimed.contains(p)),
            Resolution::Proceed(dest.clone())
        );
        assert_eq!(
            resolve_against(&dest, ConflictPolicy::Skip, |p| claimed.contains(p)),
            Resolution::Skip
        );
    }
}
