//! Copy/move execution for a single leaf.
//!
//! Every leaf is streamed into a staging file next to its final path, verified
//! there, and only then renamed into place. In move mode the source is deleted
//! last, after the destination is verified and promoted, so a failure at any
//! step leaves the source untouched.

use std::fs;
use std::path::Path;

use chrono::Local;
use log::{debug, warn};

use crate::checksums::{sha256_file, StreamingSha256};
use crate::error::LeafError;
use crate::fs_ops;
use crate::model::{CopyMode, FileLeaf, LeafStatus, ManifestEntry, VerifyMode};

/// Tagged result for one leaf. Errors stay inside the leaf that produced them.
#[derive(Debug)]
pub enum LeafOutcome {
    Copied,
    Moved,
    Skipped,
    Error(LeafError),
}

impl LeafOutcome {
    pub fn status(&self) -> LeafStatus {
        match self {
            LeafOutcome::Copied => LeafStatus::Copied,
            LeafOutcome::Moved => LeafStatus::Moved,
            LeafOutcome::Skipped => LeafStatus::Skipped,
            LeafOutcome::Error(_) => LeafStatus::Error,
        }
    }

    pub fn error(&self) -> Option<&LeafError> {
        match self {
            LeafOutcome::Error(e) => Some(e),
            _ => None,
        }
    }
}

/// Receives byte and phase notifications while a leaf executes.
pub trait LeafObserver {
    /// `bytes` more of the leaf have been written.
    fn copied(&self, bytes: u64);

    /// Verification of `leaf` by digest is starting.
    fn verifying(&self, leaf: &FileLeaf);
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl LeafObserver for NoopObserver {
    fn copied(&self, _bytes: u64) {}
    fn verifying(&self, _leaf: &FileLeaf) {}
}

/// A finished leaf: its manifest record and the tagged outcome.
#[derive(Debug)]
pub struct Executed {
    pub entry: ManifestEntry,
    pub outcome: LeafOutcome,
}

/// Performs the byte transfer for leaves.
#[derive(Debug, Clone, Copy)]
pub struct Executor {
    pub buffer_size: usize,
    pub verify_retries: u32,
}

impl Executor {
    pub fn new(buffer_size: usize, verify_retries: u32) -> Self {
        Executor {
            buffer_size,
            verify_retries,
        }
    }

    /// Copy (or move) `leaf` to `final_dest` and verify it.
    pub fn execute(
        &self,
        leaf: &FileLeaf,
        final_dest: &Path,
        mode: CopyMode,
        verify: VerifyMode,
        observer: &dyn LeafObserver,
    ) -> Executed {
        let started_at = Local::now();
        let mut checksum = None;
        let outcome = match self.transfer(leaf, final_dest, mode, verify, observer, &mut checksum) {
            Ok(outcome) => outcome,
            Err(e) => LeafOutcome::Error(e),
        };

        match &outcome {
            LeafOutcome::Error(e) => warn!("{}: {}", leaf.source_path.display(), e),
            other => debug!(
                "{} -> {}: {}",
                leaf.source_path.display(),
                final_dest.display(),
                other.status()
            ),
        }

        Executed {
            entry: ManifestEntry {
                source_path: leaf.source_path.clone(),
                dest_path: final_dest.to_path_buf(),
                size_bytes: leaf.size_bytes,
                started_at,
                finished_at: Local::now(),
                status: outcome.status(),
                error_message: outcome.error().map(|e| e.to_string()),
                checksum,
            },
            outcome,
        }
    }

    fn transfer(
        &self,
        leaf: &FileLeaf,
        final_dest: &Path,
        mode: CopyMode,
        verify: VerifyMode,
        observer: &dyn LeafObserver,
        checksum: &mut Option<String>,
    ) -> Result<LeafOutcome, LeafError> {
        if let Some(problem) = &leaf.problem {
            return Err(LeafError::Path {
                path: leaf.source_path.clone(),
                reason: problem.clone(),
            });
        }

        let staged = fs_ops::partial_path(final_dest);
        // Bytes reported to the observer are capped at the expanded size so a
        // retried copy does not push progress past the session total.
        let mut reported: u64 = 0;
        let mut attempt = 0;

        loop {
            let mut hasher = (verify == VerifyMode::Sha256).then(StreamingSha256::new);
            let copied = fs_ops::copy_streamed(
                &leaf.source_path,
                &staged,
                self.buffer_size,
                hasher.as_mut(),
                &mut |n| {
                    let add = n.min(leaf.size_bytes.saturating_sub(reported));
                    if add > 0 {
                        reported += add;
                        observer.copied(add);
                    }
                },
            );
            let copied = match copied {
                Ok(copied) => copied,
                Err(e) => {
                    fs_ops::remove_partial(&staged);
                    return Err(e);
                }
            };

            match self.check(leaf, &staged, copied, verify, hasher, observer) {
                Ok(digest) => {
                    *checksum = digest;
                    break;
                }
                Err(mismatch) => {
                    fs_ops::remove_partial(&staged);
                    if attempt >= self.verify_retries {
                        return Err(mismatch);
                    }
                    attempt += 1;
                    warn!(
                        "{} (retry {}/{})",
                        mismatch, attempt, self.verify_retries
                    );
                }
            }
        }

        if let Err(e) = fs_ops::promote(&staged, final_dest) {
            fs_ops::remove_partial(&staged);
            return Err(e);
        }

        match mode {
            CopyMode::Copy => Ok(LeafOutcome::Copied),
            CopyMode::Move => {
                fs::remove_file(&leaf.source_path).map_err(|e| LeafError::SourceCleanup {
                    path: leaf.source_path.clone(),
                    source: e,
                })?;
                Ok(LeafOutcome::Moved)
            }
        }
    }

    /// Verify the staged copy. Returns the source digest for sha256 mode.
    fn check(
        &self,
        leaf: &FileLeaf,
        staged: &Path,
        copied: u64,
        verify: VerifyMode,
        hasher: Option<StreamingSha256>,
        observer: &dyn LeafObserver,
    ) -> Result<Option<String>, LeafError> {
        match verify {
            VerifyMode::None => Ok(None),
            VerifyMode::Size => {
                let expected = fs::metadata(&leaf.source_path)
                    .map_err(|e| LeafError::io("stat source", &leaf.source_path, e))?
                    .len();
                let actual = fs::metadata(staged)
                    .map_err(|e| LeafError::io("stat destination", staged, e))?
                    .len();
                if expected != actual || copied != actual {
                    return Err(LeafError::VerifyMismatch {
                        what: "size",
                        path: leaf.source_path.clone(),
                        expected: expected.to_string(),
                        actual: actual.to_string(),
                    });
                }
                Ok(None)
            }
            VerifyMode::Sha256 => {
                observer.verifying(leaf);
                let expected = match hasher {
                    Some(h) => h.finalize_hex(),
                    None => sha256_file(&leaf.source_path, self.buffer_size)
                        .map_err(|e| LeafError::io("hash source", &leaf.source_path, e))?,
                };
                let actual = sha256_file(staged, self.buffer_size)
                    .map_err(|e| LeafError::io("hash destination", staged, e))?;
                if expected != actual {
                    return Err(LeafError::VerifyMismatch {
                        what: "sha256",
                        path: leaf.source_path.clone(),
                        expected,
                        actual,
                    });
                }
                Ok(Some(expected))
            }
        }
    }
}

/// Manifest record for a leaf skipped by the conflict policy.
pub fn skipped_entry(leaf: &FileLeaf, dest: &Path) -> Executed {
    let now = Local::now();
    Executed {
        entry: ManifestEntry {
            source_path: leaf.source_path.clone(),
            dest_path: dest.to_path_buf(),
            size_bytes: leaf.size_bytes,
            started_at: now,
            finished_at: now,
            status: LeafStatus::Skipped,
            error_message: None,
            checksum: None,
        },
        outcome: LeafOutcome::Skipped,
    }
}
