//! Segment Set
//!
//! Ordered segments (oldest → newest) plus the single ACTIVE segment.
//!
//! ## Responsibilities
//! - Route appends to the active segment
//! - Resolve reads newest → oldest
//! - Rotate the active segment
//! - Swap compaction outputs in for their inputs

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::SyncStrategy;
use crate::error::{Result, SegKvError};
use crate::record::{Entry, Record};

use super::{Segment, SegmentId, SegmentState};

/// Result of resolving a key across segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Newest record carries this value
    Found(Vec<u8>),

    /// Newest record is a tombstone
    Deleted,

    /// No segment holds the key
    NotFound,
}

/// Where an append landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    pub segment: SegmentId,
    pub offset: u64,
    /// Active segment size after the append
    pub active_size: u64,
}

// =============================================================================
// Snapshot
// =============================================================================

/// Immutable view of which segments exist and which one is active
///
/// Readers hold one for the duration of a call; rotation and compaction
/// publish a new snapshot rather than mutating this one.
#[derive(Debug, Clone)]
pub struct SegmentSnapshot {
    /// Non-active segments, oldest first
    closed: Vec<Arc<Segment>>,
    active: Arc<Segment>,
}

impl SegmentSnapshot {
    pub(crate) fn new(closed: Vec<Arc<Segment>>, active: Arc<Segment>) -> Self {
        Self { closed, active }
    }

    pub fn active(&self) -> &Arc<Segment> {
        &self.active
    }

    /// Non-active segments, oldest first
    pub fn closed(&self) -> &[Arc<Segment>] {
        &self.closed
    }

    /// All segments, newest first
    pub fn newest_first(&self) -> impl Iterator<Item = &Arc<Segment>> {
        std::iter::once(&self.active).chain(self.closed.iter().rev())
    }

    /// All segment ids, oldest first
    pub fn ids(&self) -> Vec<SegmentId> {
        self.closed
            .iter()
            .chain(std::iter::once(&self.active))
            .map(|s| s.id())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.closed.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn total_bytes(&self) -> u64 {
        self.newest_first().map(|s| s.size_bytes()).sum()
    }

    /// Resolve `key` against this snapshot
    pub fn get(&self, key: &[u8]) -> Result<Lookup> {
        for segment in self.newest_first() {
            let Some(offset) = segment.lookup(key) else {
                continue;
            };

            let record = segment.read(offset)?;
            return Ok(match record.entry {
                Entry::Value(value) => Lookup::Found(value),
                Entry::Tombstone => Lookup::Deleted,
            });
        }
        Ok(Lookup::NotFound)
    }
}

// =============================================================================
// Segment Set
// =============================================================================

/// Owner of every live segment
///
/// ## Concurrency:
/// - `snapshot`: RwLock around an `Arc`; readers clone the Arc and release
///   the lock immediately, writers publish a whole new snapshot
/// - `write_lock`: makes `append` and `rotate` mutually exclusive
/// - `next_id`: atomic counter for rotation ids
pub struct SegmentSet {
    /// Directory holding the segment files
    dir: PathBuf,

    sync_strategy: SyncStrategy,

    snapshot: RwLock<Arc<SegmentSnapshot>>,

    next_id: AtomicU64,

    write_lock: Mutex<()>,
}

impl SegmentSet {
    pub(crate) fn from_parts(
        dir: &Path,
        sync_strategy: SyncStrategy,
        snapshot: SegmentSnapshot,
        next_id: SegmentId,
    ) -> Self {
        Self {
            dir: dir.to_path_buf(),
            sync_strategy,
            snapshot: RwLock::new(Arc::new(snapshot)),
            next_id: AtomicU64::new(next_id),
            write_lock: Mutex::new(()),
        }
    }

    /// Current snapshot (cheap: one Arc clone)
    pub fn snapshot(&self) -> Arc<SegmentSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Resolve `key` newest segment first
    ///
    /// The snapshot taken here stays valid for the whole lookup even if a
    /// rotation or compaction commits meanwhile.
    pub fn get(&self, key: &[u8]) -> Result<Lookup> {
        self.snapshot().get(key)
    }

    /// Append a record to the active segment
    pub fn append(&self, record: &Record) -> Result<AppendOutcome> {
        let _guard = self.write_lock.lock();

        let snapshot = self.snapshot();
        let active = snapshot.active();
        let offset = active.append(record)?;

        Ok(AppendOutcome {
            segment: active.id(),
            offset,
            active_size: active.size_bytes(),
        })
    }

    /// Close the active segment and start a new one with the next id
    pub fn rotate(&self) -> Result<SegmentId> {
        let _guard = self.write_lock.lock();

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let fresh = Arc::new(Segment::create(&self.dir, id, self.sync_strategy)?);

        let previous = self.snapshot().active().clone();
        if let Err(e) = previous.close() {
            // Nothing references the new file yet
            fresh.retire();
            return Err(e);
        }

        {
            let mut current = self.snapshot.write();
            let mut closed = current.closed.clone();
            closed.push(Arc::clone(&current.active));
            *current = Arc::new(SegmentSnapshot::new(closed, fresh));
        }

        tracing::info!(
            closed = previous.id(),
            closed_bytes = previous.size_bytes(),
            active = id,
            "Rotated active segment"
        );

        Ok(id)
    }

    /// CLOSED segments eligible for compaction, oldest first
    pub fn segments_eligible_for_compaction(&self) -> Vec<Arc<Segment>> {
        self.snapshot()
            .closed()
            .iter()
            .filter(|s| s.state() == SegmentState::Closed)
            .cloned()
            .collect()
    }

    /// Ids of the eligible segments, oldest first
    pub fn eligible_ids(&self) -> Vec<SegmentId> {
        self.segments_eligible_for_compaction()
            .iter()
            .map(|s| s.id())
            .collect()
    }

    /// Replace a contiguous run of closed segments with their merged output
    ///
    /// A single snapshot swap: readers see either all inputs or the output.
    /// Inputs are marked RETIRED and their files go away once unreferenced.
    pub fn commit_compaction(&self, inputs: &[SegmentId], output: Arc<Segment>) -> Result<()> {
        let retired = {
            let mut current = self.snapshot.write();

            let start = current
                .closed
                .iter()
                .position(|s| Some(&s.id()) == inputs.first())
                .ok_or_else(|| {
                    SegKvError::SegmentNotFound(inputs.first().copied().unwrap_or_default())
                })?;

            let end = start + inputs.len();
            let run = current.closed.get(start..end).ok_or_else(|| {
                SegKvError::Compaction("compaction inputs extend past closed segments".to_string())
            })?;

            let contiguous = run.iter().map(|s| s.id()).eq(inputs.iter().copied());
            if !contiguous {
                return Err(SegKvError::Compaction(format!(
                    "compaction inputs {:?} are no longer a contiguous run",
                    inputs
                )));
            }

            let mut closed = Vec::with_capacity(current.closed.len() - inputs.len() + 1);
            closed.extend_from_slice(&current.closed[..start]);
            closed.push(output);
            closed.extend_from_slice(&current.closed[end..]);

            let retired: Vec<Arc<Segment>> = current.closed[start..end].to_vec();
            *current = Arc::new(SegmentSnapshot::new(closed, Arc::clone(&current.active)));
            retired
        };

        for segment in &retired {
            segment.retire();
        }
        Ok(())
    }

    /// Sync the active segment
    pub fn sync(&self) -> Result<()> {
        self.snapshot().active().sync()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn sync_strategy(&self) -> SyncStrategy {
        self.sync_strategy
    }

    /// Id the next rotation will use
    pub fn next_id(&self) -> SegmentId {
        self.next_id.load(Ordering::SeqCst)
    }

    pub fn active_id(&self) -> SegmentId {
        self.snapshot().active().id()
    }

    pub fn segment_count(&self) -> usize {
        self.snapshot().len()
    }
}

impl std::fmt::Debug for SegmentSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentSet")
            .field("dir", &self.dir)
            .field("segments", &self.snapshot().ids())
            .field("next_id", &self.next_id())
            .finish()
    }
}
