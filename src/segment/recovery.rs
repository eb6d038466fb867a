//! Segment Recovery
//!
//! Rebuilds the segment set from the files on disk after a restart.
//!
//! Steps:
//! 1. Delete `segment_*.seg.tmp` files (compactions that never committed)
//! 2. Delete segments whose range sits inside another segment's range
//!    (inputs of a committed compaction that were not yet removed)
//! 3. Open the rest oldest → newest, rebuilding each index and
//!    truncating torn tails
//! 4. Reopen the newest for appends, or create segment 1 if none exist

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::config::SyncStrategy;
use crate::error::{Result, SegKvError};

use super::{Segment, SegmentRange, SegmentSet, SegmentSnapshot, TMP_SUFFIX};

/// Result of a recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Segments opened (including the active one)
    pub segments_loaded: usize,

    /// Frames decoded while rebuilding indexes
    pub records_indexed: u64,

    /// Bytes removed from torn segment tails
    pub bytes_truncated: u64,

    /// Leftover files deleted (uncommitted outputs, superseded inputs)
    pub orphans_removed: usize,

    /// Truncations whose torn frame claimed more bytes than its whole
    /// file holds (likely a corrupt length prefix, not an interrupted write)
    pub suspect_truncations: usize,

    /// True if no segment existed and a fresh one was created
    pub created_active: bool,
}

impl SegmentSet {
    /// Discover and load every segment in `dir`
    pub fn recover(dir: &Path, sync_strategy: SyncStrategy) -> Result<(Self, RecoveryReport)> {
        fs::create_dir_all(dir)?;

        let mut report = RecoveryReport::default();
        let mut ranges = Vec::new();

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let uncommitted = name
                .strip_suffix(TMP_SUFFIX)
                .and_then(SegmentRange::parse_file_name)
                .is_some();
            if uncommitted {
                tracing::warn!(path = %path.display(), "Removing uncommitted compaction output");
                fs::remove_file(&path)?;
                report.orphans_removed += 1;
                continue;
            }

            if let Some(range) = SegmentRange::parse_file_name(name) {
                ranges.push(range);
            }
        }

        ranges.sort();
        let ranges = remove_superseded(dir, ranges, &mut report)?;

        // Open oldest → newest
        let mut segments = Vec::with_capacity(ranges.len());
        for range in &ranges {
            let (segment, rebuilt) = Segment::open(&range.path_in(dir), *range)?;
            tracing::debug!(
                segment = %range,
                records = rebuilt.records,
                keys = rebuilt.keys,
                "Rebuilt segment index"
            );
            report.records_indexed += rebuilt.records;
            report.bytes_truncated += rebuilt.truncated_bytes;
            if rebuilt.suspect_tail {
                report.suspect_truncations += 1;
            }
            segments.push(Arc::new(segment));
        }

        let next_id = ranges.last().map(|r| r.last + 1).unwrap_or(1);

        let (active, next_id) = match segments.pop() {
            Some(newest) => {
                newest.reopen_for_append(sync_strategy)?;
                (newest, next_id)
            }
            None => {
                report.created_active = true;
                (Arc::new(Segment::create(dir, next_id, sync_strategy)?), next_id + 1)
            }
        };

        report.segments_loaded = segments.len() + 1;

        tracing::info!(
            segments = report.segments_loaded,
            records = report.records_indexed,
            truncated = report.bytes_truncated,
            orphans = report.orphans_removed,
            suspect = report.suspect_truncations,
            active = active.id(),
            "Recovered segment set"
        );

        let snapshot = SegmentSnapshot::new(segments, active);
        Ok((Self::from_parts(dir, sync_strategy, snapshot, next_id), report))
    }
}

/// Drop ranges covered by a wider range; reject partial overlaps
fn remove_superseded(
    dir: &Path,
    ranges: Vec<SegmentRange>,
    report: &mut RecoveryReport,
) -> Result<Vec<SegmentRange>> {
    let mut live: Vec<SegmentRange> = Vec::with_capacity(ranges.len());

    for range in &ranges {
        let covered = ranges
            .iter()
            .any(|other| other != range && other.contains(range));

        if covered {
            let path = range.path_in(dir);
            tracing::warn!(
                segment = %range,
                path = %path.display(),
                "Removing segment superseded by compaction"
            );
            fs::remove_file(&path)?;
            report.orphans_removed += 1;
            continue;
        }

        if let Some(prev) = live.last() {
            if prev.overlaps(range) {
                return Err(SegKvError::Recovery(format!(
                    "segments {} and {} overlap without one containing the other",
                    prev, range
                )));
            }
        }
        live.push(*range);
    }

    Ok(live)
}
