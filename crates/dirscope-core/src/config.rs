/// Engine configuration.
///
/// Every field has a default, so an empty JSON object (or no file at all)
/// yields a working configuration.
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Entries delivered to the tree per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Hard cap on entries loaded for a single directory level.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// How long a cancelling caller waits for a worker to acknowledge.
pub const DEFAULT_CANCEL_TIMEOUT_MS: u64 = 2_000;

/// Capacity of each worker → consumer event channel.
///
/// The consumer drains once per frame. If it falls behind, workers stall in
/// short send attempts (re-checking their cancel flag in between) rather than
/// consuming unbounded heap.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4_096;

/// Maximum events applied per `process_events` call.
pub const DEFAULT_MAX_EVENTS_PER_FRAME: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub batch_size: usize,
    pub max_entries: usize,
    pub cancel_timeout_ms: u64,
    /// Threads used for each subtree walk. 0 = one per logical CPU, 1 = serial.
    pub walk_threads: usize,
    pub channel_capacity: usize,
    pub max_events_per_frame: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_entries: DEFAULT_MAX_ENTRIES,
            cancel_timeout_ms: DEFAULT_CANCEL_TIMEOUT_MS,
            walk_threads: 0,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_events_per_frame: DEFAULT_MAX_EVENTS_PER_FRAME,
        }
    }
}

impl ScanConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError::Invalid {
                message: message.to_string(),
            })
        };
        if self.batch_size == 0 {
            return invalid("batch_size must be > 0");
        }
        if self.max_entries == 0 {
            return invalid("max_entries must be > 0");
        }
        if self.batch_size > self.max_entries {
            return invalid("batch_size must not exceed max_entries");
        }
        if self.channel_capacity == 0 {
            return invalid("channel_capacity must be > 0");
        }
        if self.max_events_per_frame == 0 {
            return invalid("max_events_per_frame must be > 0");
        }
        Ok(())
    }

    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_timeout_ms)
    }

    /// Resolved subtree-walk thread count (never 0).
    pub fn walk_parallelism(&self) -> usize {
        match self.walk_threads {
            0 => num_cpus::get().max(1),
            n => n,
        }
    }
}
