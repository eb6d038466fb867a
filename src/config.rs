//! Configuration for SegKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, SegKvError};

/// Main configuration for a SegKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all segment files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── segment_000001-000004.seg   (compacted, covers ids 1..=4)
    ///     ├── segment_000005.seg          (closed)
    ///     └── segment_000006.seg          (active)
    pub data_dir: PathBuf,

    /// Sync strategy: how often to fsync the active segment
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Segment Configuration
    // -------------------------------------------------------------------------
    /// Rotate the active segment once it grows past this many bytes
    pub rotation_threshold_bytes: u64,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Schedule compaction once this many closed segments exist
    pub compaction_trigger_segment_count: usize,

    /// Alternative trigger: schedule compaction once closed segments
    /// hold at least this many bytes in total
    pub compaction_trigger_total_bytes: Option<u64>,

    /// Maximum number of input segments merged in one pass
    pub compaction_max_segments: usize,

    /// Run compaction on a background worker thread
    pub background_compaction: bool,
}

/// Segment sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every append (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced appends (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./segkv_data"),
            sync_strategy: SyncStrategy::EveryNEntries { count: 100 },
            rotation_threshold_bytes: 4 * 1024 * 1024, // 4 MB
            compaction_trigger_segment_count: 4,
            compaction_trigger_total_bytes: None,
            compaction_max_segments: 8,
            background_compaction: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that the options are usable together
    pub fn validate(&self) -> Result<()> {
        if self.rotation_threshold_bytes == 0 {
            return Err(SegKvError::Config(
                "rotation_threshold_bytes must be greater than zero".to_string(),
            ));
        }
        if self.compaction_trigger_segment_count == 0 {
            return Err(SegKvError::Config(
                "compaction_trigger_segment_count must be greater than zero".to_string(),
            ));
        }
        if self.compaction_max_segments < 2 {
            return Err(SegKvError::Config(format!(
                "compaction_max_segments must be at least 2, got {}",
                self.compaction_max_segments
            )));
        }
        if let SyncStrategy::EveryNEntries { count: 0 } = self.sync_strategy {
            return Err(SegKvError::Config(
                "EveryNEntries sync count must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all segments)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the rotation threshold (in bytes)
    pub fn rotation_threshold_bytes(mut self, bytes: u64) -> Self {
        self.config.rotation_threshold_bytes = bytes;
        self
    }

    /// Set the closed-segment count that schedules compaction
    pub fn compaction_trigger_segment_count(mut self, count: usize) -> Self {
        self.config.compaction_trigger_segment_count = count;
        self
    }

    /// Set the closed-segment byte total that schedules compaction
    pub fn compaction_trigger_total_bytes(mut self, bytes: u64) -> Self {
        self.config.compaction_trigger_total_bytes = Some(bytes);
        self
    }

    /// Set the maximum number of segments merged per compaction
    pub fn compaction_max_segments(mut self, count: usize) -> Self {
        self.config.compaction_max_segments = count;
        self
    }

    /// Enable or disable the background compaction worker
    pub fn background_compaction(mut self, enabled: bool) -> Self {
        self.config.background_compaction = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
