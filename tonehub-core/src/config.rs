use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::metadata::MAX_TAG_VALUE_BYTES;

/// Runtime knobs for the reconciler and the per-source pipelines.
///
/// Every field has a default so a partial file (or none at all) is valid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Reconciliation tick.
    pub poll_interval_ms: u64,
    /// Minimum gap between the end of a pass and a time-driven rescan.
    /// Falls back to `poll_interval_ms` when absent.
    pub rescan_interval_ms: Option<u64>,
    /// How long an unobserved entry stays disabled before it is deleted.
    pub orphan_grace_secs: u64,
    /// Files drained from the discovery queue per updater pull.
    pub batch_size: usize,
    /// Discovery queue bound; the walk suspends when it is full.
    pub queue_capacity: usize,
    /// Cap on hashed payload bytes, centred in the payload. `None` hashes
    /// the whole payload.
    pub max_hash_bytes: Option<u64>,
    /// Stored tag values are truncated to this many UTF-8 bytes.
    pub max_tag_bytes: usize,
    pub watch: WatchConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 30_000,
            rescan_interval_ms: None,
            orphan_grace_secs: 86_400,
            batch_size: 10,
            queue_capacity: 50,
            max_hash_bytes: None,
            max_tag_bytes: MAX_TAG_VALUE_BYTES,
            watch: WatchConfig::default(),
        }
    }
}

impl IndexerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms.unwrap_or(self.poll_interval_ms))
    }

    pub fn orphan_grace(&self) -> chrono::Duration {
        i64::try_from(self.orphan_grace_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(IndexError::Config("batch_size must be at least 1".into()));
        }
        if self.queue_capacity < self.batch_size {
            return Err(IndexError::Config(format!(
                "queue_capacity ({}) must not be smaller than batch_size ({})",
                self.queue_capacity, self.batch_size
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(IndexError::Config("poll_interval_ms must be positive".into()));
        }
        if self.max_tag_bytes == 0 {
            return Err(IndexError::Config("max_tag_bytes must be positive".into()));
        }
        Ok(())
    }
}

/// Filesystem notification tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enabled: bool,
    /// Raw events inside this window collapse into one source-changed signal.
    pub debounce_window_ms: u64,
    pub channel_capacity: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_window_ms: 2_000,
            channel_capacity: 256,
        }
    }
}

impl WatchConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }
}
