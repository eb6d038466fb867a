//! Segment Module
//!
//! Append-only segment files, their in-memory indexes, and the ordered set
//! of segments that resolves reads.
//!
//! ## Responsibilities
//! - Append encoded records to the single ACTIVE segment
//! - Keep a key → last offset index per segment
//! - Rotate the active segment once it passes the size threshold
//! - Resolve reads newest segment first
//! - Rebuild indexes and truncate torn tails on startup
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//!   segment_000001-000004.seg   compaction output covering ids 1..=4
//!   segment_000005.seg          CLOSED
//!   segment_000006.seg          ACTIVE
//!   segment_000007-000009.seg.tmp   unfinished compaction output (discarded)
//! ```
//!
//! ## Lifecycle
//! ```text
//! ACTIVE ──rotate──► CLOSED ──select──► COMPACTING ──commit──► RETIRED ──last Arc dropped──► deleted
//!                      ▲                     │
//!                      └──────failure────────┘
//! ```

mod builder;
mod file;
mod index;
mod recovery;
mod scanner;
mod set;

use std::fmt;
use std::path::{Path, PathBuf};

pub use builder::{file_checksum, BuiltSegment, SegmentBuilder};
pub use file::{RebuildReport, Segment};
pub use index::SegmentIndex;
pub use recovery::RecoveryReport;
pub use scanner::SegmentScanner;
pub use set::{AppendOutcome, Lookup, SegmentSet, SegmentSnapshot};

/// Monotonic segment identifier
pub type SegmentId = u64;

/// File extension of a committed segment
pub(crate) const SEGMENT_EXT: &str = "seg";

/// Suffix of a compaction output that has not been committed yet
pub(crate) const TMP_SUFFIX: &str = ".tmp";

const SEGMENT_PREFIX: &str = "segment_";

// =============================================================================
// Segment Range
// =============================================================================

/// Inclusive range of segment ids whose records a segment holds
///
/// Rotation produces single-id ranges; compaction produces the union of
/// its inputs. Ranges of live segments never overlap, so `last` orders them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentRange {
    pub first: SegmentId,
    pub last: SegmentId,
}

impl SegmentRange {
    pub fn single(id: SegmentId) -> Self {
        Self { first: id, last: id }
    }

    pub fn span(first: SegmentId, last: SegmentId) -> Self {
        Self { first, last }
    }

    /// True if `other` lies entirely inside this range
    pub fn contains(&self, other: &SegmentRange) -> bool {
        self.first <= other.first && other.last <= self.last
    }

    pub fn overlaps(&self, other: &SegmentRange) -> bool {
        self.first <= other.last && other.first <= self.last
    }

    /// File name of the committed segment with this range
    ///
    /// "segment_000042.seg" or "segment_000001-000004.seg"
    pub fn file_name(&self) -> String {
        if self.first == self.last {
            format!("{}{:06}.{}", SEGMENT_PREFIX, self.last, SEGMENT_EXT)
        } else {
            format!(
                "{}{:06}-{:06}.{}",
                SEGMENT_PREFIX, self.first, self.last, SEGMENT_EXT
            )
        }
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }

    /// Path a compaction writes to before committing this range
    pub fn tmp_path_in(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}{}", self.file_name(), TMP_SUFFIX))
    }

    /// Parse a committed segment file name
    pub fn parse_file_name(name: &str) -> Option<Self> {
        let stem = name
            .strip_prefix(SEGMENT_PREFIX)?
            .strip_suffix(SEGMENT_EXT)?
            .strip_suffix('.')?;

        match stem.split_once('-') {
            Some((first, last)) => {
                let range = Self::span(first.parse().ok()?, last.parse().ok()?);
                (range.first <= range.last).then_some(range)
            }
            None => stem.parse().ok().map(Self::single),
        }
    }
}

impl fmt::Display for SegmentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "{}", self.last)
        } else {
            write!(f, "{}..={}", self.first, self.last)
        }
    }
}

// =============================================================================
// Segment State
// =============================================================================

/// Lifecycle state of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SegmentState {
    /// Current write target
    Active = 0,

    /// Read-only, eligible for compaction
    Closed = 1,

    /// Being merged; still serves reads
    Compacting = 2,

    /// Superseded by a committed compaction; deleted once unreferenced
    Retired = 3,
}

impl SegmentState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SegmentState::Active,
            1 => SegmentState::Closed,
            2 => SegmentState::Compacting,
            _ => SegmentState::Retired,
        }
    }
}
