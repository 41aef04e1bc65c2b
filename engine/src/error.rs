//! Error types for the transfer engine.
//!
//! Errors are split by blast radius:
//! - `LeafError` affects a single file. It is recorded in that file's manifest
//!   entry and the session carries on with the next leaf.
//! - `FatalSessionError` stops the whole session (destination gone, no room,
//!   session directory unwritable).
//! - `EngineError` is what the public API returns.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::TransferSummary;

/// Failure confined to one leaf.
#[derive(Debug, Error)]
pub enum LeafError {
    /// The queued source vanished or could not be read
    #[error("source unavailable: {path}: {reason}")]
    Path { path: PathBuf, reason: String },

    /// Read, write or create failed while copying
    #[error("{op} failed for {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Post-copy check failed; the destination file has been removed
    #[error("verify failed: {what} mismatch for {path} (expected {expected}, found {actual})")]
    VerifyMismatch {
        what: &'static str,
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Copy verified but the source could not be deleted (move mode)
    #[error("move cleanup failed for {path}: {source}")]
    SourceCleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LeafError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        LeafError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// The underlying I/O error, if any.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            LeafError::Io { source, .. } | LeafError::SourceCleanup { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        self.io_error().and_then(io::Error::raw_os_error)
    }
}

/// Failure that aborts the whole session.
#[derive(Debug, Error)]
pub enum FatalSessionError {
    #[error("not enough free space on destination: need {required} bytes (incl. {margin} margin), {available} available")]
    InsufficientSpace {
        required: u64,
        available: u64,
        margin: u64,
    },

    #[error("destination not found: {path}")]
    DestinationMissing { path: PathBuf },

    #[error("failed to query free space for {path}: {source}")]
    SpaceQuery {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create session directory {path}: {source}")]
    SessionDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("destination became unavailable during transfer: {path}")]
    DestinationLost { path: PathBuf },

    #[error("failed to write manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors returned by the engine API.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a transfer session is already active")]
    SessionActive,

    /// The session was refused before any leaf started
    #[error("transfer rejected: {0}")]
    Rejected(#[from] FatalSessionError),

    /// The session started but had to stop; `summary` covers the leaves processed so far
    #[error("transfer aborted: {cause}")]
    Aborted {
        cause: FatalSessionError,
        summary: Box<TransferSummary>,
    },

    #[error("failed to read volume table: {0}")]
    VolumeTable(#[source] io::Error),

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

impl EngineError {
    /// The fatal cause behind a rejected or aborted session.
    pub fn fatal(&self) -> Option<&FatalSessionError> {
        match self {
            EngineError::Rejected(cause) | EngineError::Aborted { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Partial summary of an aborted session.
    pub fn summary(&self) -> Option<&TransferSummary> {
        match self {
            EngineError::Aborted { summary, .. } => Some(summary),
            _ => None,
        }
    }
}

/// True when an I/O error indicates the device itself went away.
pub(crate) fn is_device_gone(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        use rustix::io::Errno;
        matches!(
            Errno::from_io_error(err),
            Some(Errno::IO | Errno::NXIO | Errno::NODEV | Errno::STALE)
        )
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_error_messages() {
        let err = LeafError::VerifyMismatch {
            what: "size",
            path: PathBuf::from("/dst/a.txt"),
            expected: "10".into(),
            actual: "4".into(),
        };
        assert_eq!(
            err.to_string(),
            "verify failed: size mismatch for /dst/a.txt (expected 10, found 4)"
        );
        assert!(err.io_error().is_none());

        let err = LeafError::io(
            "write",
            "/dst/b.txt",
            io::Error::from_raw_os_error(28),
        );
        assert!(err.to_string().starts_with("write failed for /dst/b.txt"));
        assert_eq!(err.raw_os_error(), Some(28));
    }

    #[cfg(unix)]
    #[test]
    fn test_device_gone_uses_platform_errno() {
        use rustix::io::Errno;
        for errno in [Errno::IO, Errno::NXIO, Errno::NODEV, Errno::STALE] {
            assert!(is_device_gone(&io::Error::from_raw_os_error(errno.raw_os_error())));
        }
        assert!(!is_device_gone(&io::Error::from_raw_os_error(Errno::NOSPC.raw_os_error())));
        assert!(!is_device_gone(&io::Error::new(io::ErrorKind::Other, "no errno")));
    }

    #[test]
    fn test_engine_error_exposes_cause() {
        let err = EngineError::from(FatalSessionError::InsufficientSpace {
            required: 10,
            available: 5,
            margin: 0,
        });
        assert!(matches!(
            err.fatal(),
            Some(FatalSessionError::InsufficientSpace { .. })
        ));
        assert!(err.summary().is_none());
        assert!(EngineError::SessionActive.fatal().is_none());
    }
}
