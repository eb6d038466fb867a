//! Engine Module
//!
//! The public key-value API over the segment set.
//!
//! ## Responsibilities
//! - Route set/get/delete through the segment set
//! - Rotate the active segment when it passes the size threshold
//! - Schedule background compaction without blocking writers
//! - Recover the segment set on startup

use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::compaction::{CompactionPolicy, CompactionReport, CompactionWorker, Compactor};
use crate::config::Config;
use crate::error::{Result, SegKvError};
use crate::record::Record;
use crate::segment::{Lookup, RecoveryReport, SegmentId, SegmentSet};

/// Point-in-time engine statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Id of the ACTIVE segment
    pub active_segment: SegmentId,
    /// Bytes in the ACTIVE segment
    pub active_bytes: u64,
    /// Segments other than the active one
    pub closed_segments: usize,
    /// Bytes across all segments
    pub total_bytes: u64,
    /// Compactions committed since open
    pub compactions_completed: u64,
}

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (set/delete/rotate): Serialized by `write_lock`
///   - append + threshold check + rotation happen as one unit
///
/// - **Reads** (get): No engine lock
///   - Each read resolves against one segment-set snapshot
///   - Closed segments are immutable, so no coordination with writers
///
/// - **Compaction**: Background worker thread
///   - Touches CLOSED segments only; commits by snapshot swap
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// All live segments
    segments: Arc<SegmentSet>,

    /// Shared with the background worker
    compactor: Arc<Compactor>,

    /// `None` when background compaction is disabled
    worker: Option<CompactionWorker>,

    /// What startup recovery found
    recovery: RecoveryReport,

    /// Serializes write operations
    write_lock: Mutex<()>,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate config, create the data directory
    /// 2. Recover segments (rebuild indexes, truncate torn tails)
    /// 3. Start the compaction worker
    /// 4. Schedule compaction if thresholds are already crossed
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let (segments, recovery) = SegmentSet::recover(&config.data_dir, config.sync_strategy)?;
        let segments = Arc::new(segments);

        let compactor = Arc::new(Compactor::new(
            Arc::clone(&segments),
            CompactionPolicy::from_config(&config),
        ));

        let worker = if config.background_compaction {
            Some(CompactionWorker::spawn(Arc::clone(&compactor))?)
        } else {
            None
        };

        let engine = Self {
            config,
            segments,
            compactor,
            worker,
            recovery,
            write_lock: Mutex::new(()),
        };
        engine.schedule_compaction();

        Ok(engine)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }

    /// Open and hand back the recovery report alongside the engine
    pub fn recover(config: Config) -> Result<(Self, RecoveryReport)> {
        let engine = Self::open(config)?;
        let report = engine.recovery.clone();
        Ok((engine, report))
    }

    /// Get a value by key
    ///
    /// Deleted and never-written keys both return `None`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.segments.get(key)? {
            Lookup::Found(value) => Ok(Some(value)),
            Lookup::Deleted | Lookup::NotFound => Ok(None),
        }
    }

    /// Set a key-value pair
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write(Record::value(key, value))
    }

    /// Delete a key by appending a tombstone
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.write(Record::tombstone(key))
    }

    /// Append, then rotate if the active segment passed the threshold
    ///
    /// Once the append lands the write is durable per the sync strategy
    /// and visible to `get`, so a failed rotation afterwards is logged
    /// rather than returned; the next write retries it.
    fn write(&self, record: Record) -> Result<()> {
        let rotated = {
            let _write_guard = self.write_lock.lock();

            let outcome = match self.segments.append(&record) {
                Err(SegKvError::SegmentClosed(id)) => {
                    // Active segment gave up its append handle
                    tracing::warn!(segment = id, "Active segment refused the write, rotating");
                    self.segments.rotate()?;
                    self.segments.append(&record)?
                }
                other => other?,
            };

            if outcome.active_size > self.config.rotation_threshold_bytes {
                match self.segments.rotate() {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::error!(
                            segment = outcome.segment,
                            active_bytes = outcome.active_size,
                            "Rotation failed after a successful write: {}",
                            e
                        );
                        false
                    }
                }
            } else {
                false
            }
        };

        if rotated {
            self.schedule_compaction();
        }
        Ok(())
    }

    /// Close the active segment now, regardless of size
    pub fn rotate(&self) -> Result<SegmentId> {
        let id = {
            let _write_guard = self.write_lock.lock();
            self.segments.rotate()?
        };
        self.schedule_compaction();
        Ok(id)
    }

    /// Run one compaction on the calling thread
    ///
    /// Returns `None` if halted or fewer than two segments are eligible.
    pub fn compact(&self) -> Result<Option<CompactionReport>> {
        self.compactor.run()
    }

    /// Wait until the background worker has handled every pending trigger
    pub fn wait_for_compaction(&self) -> Result<()> {
        match &self.worker {
            Some(worker) => worker.wait_idle(),
            None => Ok(()),
        }
    }

    /// Stop starting new compactions (a running merge completes)
    pub fn halt_compaction(&self) {
        self.compactor.halt();
    }

    pub fn resume_compaction(&self) {
        self.compactor.resume();
        self.schedule_compaction();
    }

    fn schedule_compaction(&self) {
        let Some(worker) = &self.worker else {
            return;
        };
        if !self.compactor.is_halted() && self.compactor.needs_compaction() {
            tracing::debug!("Scheduling background compaction");
            worker.trigger();
        }
    }

    /// Force appended data to disk
    pub fn sync(&self) -> Result<()> {
        self.segments.sync()
    }

    /// Close the engine gracefully
    ///
    /// Stops the compaction worker (after its current merge) and syncs.
    pub fn close(mut self) -> Result<()> {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
        self.segments.sync()
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn stats(&self) -> EngineStats {
        let snapshot = self.segments.snapshot();
        EngineStats {
            active_segment: snapshot.active().id(),
            active_bytes: snapshot.active().size_bytes(),
            closed_segments: snapshot.closed().len(),
            total_bytes: snapshot.total_bytes(),
            compactions_completed: self.compactor.completed(),
        }
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// The segment set (for inspection)
    pub fn segments(&self) -> &SegmentSet {
        &self.segments
    }

    /// What startup recovery found
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("data_dir", &self.config.data_dir)
            .field("segments", &self.segments)
            .field("background_compaction", &self.worker.is_some())
            .finish()
    }
}
