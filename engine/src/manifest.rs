//! Per-session manifest.
//!
//! `manifest.jsonl` is appended to after every leaf and synced, so a crash or
//! an unplugged drive still leaves a record of everything processed up to that
//! point. `manifest.json` is the finished document written when the session
//! reaches a terminal phase.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FatalSessionError;
use crate::model::{ManifestEntry, Phase, TransferSummary};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const JOURNAL_FILE: &str = "manifest.jsonl";

/// The finished manifest document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub session_id: Uuid,
    pub phase: Phase,
    pub summary: TransferSummary,
    pub entries: Vec<ManifestEntry>,
}

struct Journal {
    file: File,
    entries: Vec<ManifestEntry>,
}

/// Appends entries for one session. Shared between workers.
pub struct ManifestWriter {
    session_dir: PathBuf,
    journal_path: PathBuf,
    inner: Mutex<Journal>,
}

impl ManifestWriter {
    /// Create the journal inside `session_dir`.
    pub fn create(session_dir: &Path) -> Result<Self, FatalSessionError> {
        let journal_path = session_dir.join(JOURNAL_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)
            .map_err(|source| FatalSessionError::Manifest {
                path: journal_path.clone(),
                source,
            })?;
        Ok(ManifestWriter {
            session_dir: session_dir.to_path_buf(),
            journal_path,
            inner: Mutex::new(Journal {
                file,
                entries: Vec::new(),
            }),
        })
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    /// Append one entry and flush it to disk before returning.
    pub fn record(&self, entry: &ManifestEntry) -> Result<(), FatalSessionError> {
        let mut line = serde_json::to_vec(entry).map_err(|e| self.fail(io::Error::from(e)))?;
        line.push(b'\n');

        let mut journal = self.lock();
        journal
            .file
            .write_all(&line)
            .and_then(|()| journal.file.sync_data())
            .map_err(|e| self.fail(e))?;
        journal.entries.push(entry.clone());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write `manifest.json` with every recorded entry.
    pub fn finish(&self, session_id: Uuid, summary: &TransferSummary) -> Result<PathBuf, FatalSessionError> {
        let path = self.session_dir.join(MANIFEST_FILE);
        let manifest = Manifest {
            session_id,
            phase: summary.phase,
            summary: summary.clone(),
            entries: self.lock().entries.clone(),
        };
        let json = serde_json::to_vec_pretty(&manifest).map_err(|e| FatalSessionError::Manifest {
            path: path.clone(),
            source: io::Error::from(e),
        })?;
        write_synced(&path, &json).map_err(|source| FatalSessionError::Manifest {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    fn fail(&self, source: io::Error) -> FatalSessionError {
        FatalSessionError::Manifest {
            path: self.journal_path.clone(),
            source,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Journal> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

/// Read every entry of a journal. A torn last line (crash mid-append) is ignored.
pub fn read_manifest_journal(path: &Path) -> io::Result<Vec<ManifestEntry>> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines().peekable();
    let mut entries = Vec::new();
    while let Some(line) = lines.next() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) if lines.peek().is_none() => {
                log::warn!("ignoring truncated manifest line in {}: {}", path.display(), e);
            }
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        }
    }
    Ok(entries)
}

/// Read a finished `manifest.json`.
pub fn read_manifest(path: &Path) -> io::Result<Manifest> {
    let data = fs::read(path)?;
    serde_json::from_slice(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
