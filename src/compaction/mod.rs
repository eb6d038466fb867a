//! Compaction Module
//!
//! Merges a contiguous run of CLOSED segments into one segment holding
//! only each key's winning record.
//!
//! ## Merge Rules
//! - The winner for a key is its record in the newest input segment that
//!   holds it (the index already resolves ties inside a segment)
//! - A winning tombstone is dropped unless an older segment outside the
//!   run still indexes the key; then it is kept to mask that value
//!
//! ## Commit Protocol
//! ```text
//! write segment_F-L.seg.tmp ─► fsync ─► verify CRC ─► rename to segment_F-L.seg
//!   ─► fsync dir ─► swap snapshot ─► inputs RETIRED ─► files deleted when unreferenced
//! ```
//! The rename is the durable commit point. A crash before it leaves a
//! `.tmp` file that recovery deletes; a crash after it leaves inputs whose
//! ranges the output contains, which recovery also deletes.

mod worker;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{Result, SegKvError};
use crate::segment::{
    BuiltSegment, Segment, SegmentBuilder, SegmentId, SegmentRange, SegmentSet, SegmentState,
};

pub use worker::{CompactionRequest, CompactionWorker};

// =============================================================================
// Policy
// =============================================================================

/// When to compact and how much to merge at once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionPolicy {
    /// Closed-segment count that makes compaction due
    pub trigger_segment_count: usize,
    /// Closed-segment byte total that makes compaction due
    pub trigger_total_bytes: Option<u64>,
    /// Cap on inputs per merge
    pub max_segments: usize,
}

impl CompactionPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            trigger_segment_count: config.compaction_trigger_segment_count,
            trigger_total_bytes: config.compaction_trigger_total_bytes,
            max_segments: config.compaction_max_segments.max(2),
        }
    }
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// =============================================================================
// Reports
// =============================================================================

/// What a merge wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Records in the output
    pub records_written: u64,
    /// Input frames that did not survive (shadowed or dropped tombstones)
    pub records_discarded: u64,
    /// Tombstones dropped because nothing older holds the key
    pub tombstones_dropped: u64,
    /// Tombstones kept to mask an older segment's value
    pub tombstones_retained: u64,
}

/// Summary of a committed compaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    /// Input segment ids, oldest first
    pub inputs: Vec<SegmentId>,
    /// Range covered by the output segment
    pub output: SegmentRange,
    pub stats: MergeStats,
    /// Input bytes
    pub bytes_before: u64,
    /// Output bytes
    pub bytes_after: u64,
    /// CRC32 of the output file
    pub checksum: u32,
}

// =============================================================================
// Merge
// =============================================================================

/// Merge `inputs` (oldest first) into a new segment file at `dest`
///
/// `older` are the live segments preceding the inputs; a tombstone survives
/// only if one of them still indexes its key. Inputs are only read.
pub fn merge(
    inputs: &[Arc<Segment>],
    older: &[Arc<Segment>],
    dest: &Path,
) -> Result<(BuiltSegment, MergeStats)> {
    // key → (input position, offset); newest input claims a key first.
    // BTreeMap keeps the output in key order, so reruns are byte-identical.
    let mut winners: BTreeMap<Vec<u8>, (usize, u64)> = BTreeMap::new();
    for (pos, segment) in inputs.iter().enumerate().rev() {
        for (key, offset) in segment.index_entries() {
            winners.entry(key).or_insert((pos, offset));
        }
    }

    let mut stats = MergeStats::default();
    let mut builder = SegmentBuilder::new(dest)?;

    for (key, (pos, offset)) in winners {
        let record = inputs[pos].read(offset)?;

        if record.is_tombstone() {
            let masks_older = older.iter().any(|s| s.contains(&key));
            if !masks_older {
                stats.tombstones_dropped += 1;
                continue;
            }
            stats.tombstones_retained += 1;
        }

        builder.add(&record)?;
    }

    let built = builder.finish()?;

    let frames_in: u64 = inputs.iter().map(|s| s.record_count()).sum();
    stats.records_written = built.records;
    stats.records_discarded = frames_in.saturating_sub(built.records);

    Ok((built, stats))
}

// =============================================================================
// Compactor
// =============================================================================

/// Inputs chosen for one merge
#[derive(Debug, Clone)]
pub struct CompactionPlan {
    /// Contiguous run of CLOSED segments, oldest first
    pub inputs: Vec<Arc<Segment>>,
    /// Live segments older than the run
    pub older: Vec<Arc<Segment>>,
}

impl CompactionPlan {
    pub fn output_range(&self) -> Option<SegmentRange> {
        let first = self.inputs.first()?.range().first;
        let last = self.inputs.last()?.range().last;
        Some(SegmentRange::span(first, last))
    }

    pub fn input_ids(&self) -> Vec<SegmentId> {
        self.inputs.iter().map(|s| s.id()).collect()
    }
}

/// Runs merges against a segment set, one at a time
///
/// ## Concurrency:
/// - `run_lock`: at most one merge in flight
/// - `halted`: when set, no new merge starts (a running one finishes)
pub struct Compactor {
    segments: Arc<SegmentSet>,
    policy: CompactionPolicy,
    run_lock: Mutex<()>,
    halted: AtomicBool,
    completed: AtomicU64,
}

impl Compactor {
    pub fn new(segments: Arc<SegmentSet>, policy: CompactionPolicy) -> Self {
        Self {
            segments,
            policy,
            run_lock: Mutex::new(()),
            halted: AtomicBool::new(false),
            completed: AtomicU64::new(0),
        }
    }

    /// True if the closed segments cross a trigger threshold
    pub fn needs_compaction(&self) -> bool {
        let eligible = self.segments.segments_eligible_for_compaction();
        if eligible.len() < 2 {
            return false;
        }

        let by_count = eligible.len() >= self.policy.trigger_segment_count;
        let by_bytes = self.policy.trigger_total_bytes.map_or(false, |limit| {
            eligible.iter().map(|s| s.size_bytes()).sum::<u64>() >= limit
        });
        by_count || by_bytes
    }

    /// Choose the oldest contiguous run of 2..=max_segments CLOSED segments
    pub fn plan(&self) -> Option<CompactionPlan> {
        let snapshot = self.segments.snapshot();
        let closed = snapshot.closed();

        let start = closed
            .iter()
            .position(|s| s.state() == SegmentState::Closed)?;

        let inputs: Vec<Arc<Segment>> = closed[start..]
            .iter()
            .take_while(|s| s.state() == SegmentState::Closed)
            .take(self.policy.max_segments)
            .cloned()
            .collect();

        if inputs.len() < 2 {
            return None;
        }

        Some(CompactionPlan {
            inputs,
            older: closed[..start].to_vec(),
        })
    }

    /// Plan, merge and commit one compaction
    ///
    /// Returns `Ok(None)` when halted or when there is nothing to merge.
    /// On failure the inputs go back to CLOSED and stay authoritative.
    pub fn run(&self) -> Result<Option<CompactionReport>> {
        if self.is_halted() {
            return Ok(None);
        }

        let _guard = self.run_lock.lock();

        let Some(plan) = self.plan() else {
            return Ok(None);
        };

        let claimed: Vec<&Arc<Segment>> = plan
            .inputs
            .iter()
            .take_while(|s| s.transition(SegmentState::Closed, SegmentState::Compacting))
            .collect();
        if claimed.len() != plan.inputs.len() {
            for segment in claimed {
                segment.transition(SegmentState::Compacting, SegmentState::Closed);
            }
            return Ok(None);
        }

        match self.execute(&plan) {
            Ok(report) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                Ok(Some(report))
            }
            Err(e) => {
                tracing::error!(inputs = ?plan.input_ids(), "Compaction failed: {}", e);
                for segment in &plan.inputs {
                    segment.transition(SegmentState::Compacting, SegmentState::Closed);
                }
                Err(e)
            }
        }
    }

    fn execute(&self, plan: &CompactionPlan) -> Result<CompactionReport> {
        let started = Instant::now();
        let dir = self.segments.dir();
        let range = plan
            .output_range()
            .ok_or_else(|| SegKvError::Compaction("empty compaction plan".to_string()))?;
        let inputs = plan.input_ids();
        let bytes_before: u64 = plan.inputs.iter().map(|s| s.size_bytes()).sum();

        tracing::info!(inputs = ?inputs, output = %range, bytes_before, "Starting compaction");

        let tmp_path = range.tmp_path_in(dir);
        let final_path = range.path_in(dir);

        let (mut built, stats) = match merge(&plan.inputs, &plan.older, &tmp_path)
            .and_then(|(built, stats)| built.verify().map(|()| (built, stats)))
        {
            Ok(out) => out,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };

        fs::rename(&tmp_path, &final_path)?;
        sync_dir(dir)?;

        let output = Segment::from_built(
            &final_path,
            range,
            built.take_index(),
            built.size,
            built.records,
        )?;
        self.segments.commit_compaction(&inputs, Arc::new(output))?;

        let report = CompactionReport {
            inputs,
            output: range,
            stats,
            bytes_before,
            bytes_after: built.size,
            checksum: built.checksum,
        };

        tracing::info!(
            output = %range,
            records = report.stats.records_written,
            discarded = report.stats.records_discarded,
            tombstones_dropped = report.stats.tombstones_dropped,
            bytes_before,
            bytes_after = report.bytes_after,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Committed compaction"
        );

        Ok(report)
    }

    /// Stop starting new merges
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.halted.store(false, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Merges committed since startup
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn policy(&self) -> CompactionPolicy {
        self.policy
    }
}

/// Make a rename in `dir` durable
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
