//! Engine tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bytes that must remain free on the destination after the transfer.
pub const DEFAULT_SPACE_SAFETY_MARGIN: u64 = 0;

/// Re-copy attempts after a verification mismatch.
pub const DEFAULT_VERIFY_RETRIES: u32 = 0;

/// Upper bound for the derived worker count. External drives rarely gain
/// from more parallel writers than this.
pub const MAX_DEFAULT_CONCURRENCY: usize = 4;

pub const DEFAULT_COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// Roughly eight snapshots per second.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(120);

/// Engine-wide settings shared by every session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of worker threads copying leaves
    pub concurrency: usize,

    /// Streaming buffer size per worker
    pub copy_buffer_size: usize,

    /// Minimum time between throttled progress snapshots
    #[serde(with = "millis")]
    pub progress_interval: Duration,

    /// Free space required on top of the transfer size
    pub space_safety_margin_bytes: u64,

    /// How often a leaf is re-copied after a verification mismatch
    pub verify_retries: u32,
}

impl EngineConfig {
    /// Worker count actually used: at least one.
    pub fn workers(&self) -> usize {
        self.concurrency.max(1)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        EngineConfig {
            concurrency: cores.min(MAX_DEFAULT_CONCURRENCY),
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            space_safety_margin_bytes: DEFAULT_SPACE_SAFETY_MARGIN,
            verify_retries: DEFAULT_VERIFY_RETRIES,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
