//! Segment File
//!
//! One append-only log of record frames plus its in-memory index.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::config::SyncStrategy;
use crate::error::{CorruptionKind, Result, SegKvError};
use crate::record::{self, Record};

use super::{SegmentId, SegmentIndex, SegmentRange, SegmentScanner, SegmentState};

/// Outcome of a full index rebuild
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    /// Frames decoded
    pub records: u64,
    /// Distinct keys in the rebuilt index
    pub keys: usize,
    /// Bytes cut from a torn tail (0 if the file ended cleanly)
    pub truncated_bytes: u64,
    /// The torn frame claimed more bytes than the whole file holds
    pub suspect_tail: bool,
}

/// A single segment: file, index, and lifecycle state
///
/// ## Concurrency:
/// - `writer`: Mutex, held across write + index update so an offset is
///   only published once its bytes are in the file
/// - `reader`: Mutex<BufReader>, reads seek a dedicated handle
/// - `index`: RwLock inside `SegmentIndex`
/// - `size`/`records`: atomics, updated under the writer lock
pub struct Segment {
    range: SegmentRange,

    /// Key → offset of last record
    index: SegmentIndex,

    /// Current file length in bytes
    size: AtomicU64,

    /// Frames in the file (including shadowed ones)
    records: AtomicU64,

    /// Read handle
    reader: Mutex<BufReader<File>>,

    /// Append handle; `None` once the segment is closed
    writer: Mutex<Option<SegmentWriter>>,

    /// Declared last: drops after the file handles above are closed
    lifecycle: Lifecycle,
}

impl Segment {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Create a new, empty ACTIVE segment in `dir`
    pub fn create(dir: &Path, id: SegmentId, sync_strategy: SyncStrategy) -> Result<Self> {
        let range = SegmentRange::single(id);
        let path = range.path_in(dir);

        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)?;
        file.sync_all()?;

        let reader = BufReader::new(File::open(&path)?);

        tracing::debug!(segment = id, path = %path.display(), "Created segment");

        Ok(Self {
            range,
            index: SegmentIndex::new(),
            size: AtomicU64::new(0),
            records: AtomicU64::new(0),
            reader: Mutex::new(reader),
            writer: Mutex::new(Some(SegmentWriter::new(Box::new(file), sync_strategy))),
            lifecycle: Lifecycle::new(path, SegmentState::Active),
        })
    }

    /// Open an existing segment file as CLOSED and rebuild its index
    ///
    /// A torn final frame is truncated away; corruption anywhere else is fatal.
    pub fn open(path: &Path, range: SegmentRange) -> Result<(Self, RebuildReport)> {
        let reader = BufReader::new(File::open(path)?);

        let segment = Self {
            range,
            index: SegmentIndex::new(),
            size: AtomicU64::new(0),
            records: AtomicU64::new(0),
            reader: Mutex::new(reader),
            writer: Mutex::new(None),
            lifecycle: Lifecycle::new(path.to_path_buf(), SegmentState::Closed),
        };

        let report = segment.rebuild_index()?;
        Ok((segment, report))
    }

    /// Wrap a finished compaction output whose index was built while writing
    pub fn from_built(
        path: &Path,
        range: SegmentRange,
        index: SegmentIndex,
        size: u64,
        records: u64,
    ) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);

        Ok(Self {
            range,
            index,
            size: AtomicU64::new(size),
            records: AtomicU64::new(records),
            reader: Mutex::new(reader),
            writer: Mutex::new(None),
            lifecycle: Lifecycle::new(path.to_path_buf(), SegmentState::Closed),
        })
    }

    /// Reopen a recovered segment for appends, making it ACTIVE
    pub fn reopen_for_append(&self, sync_strategy: SyncStrategy) -> Result<()> {
        let file = OpenOptions::new().append(true).open(self.path())?;
        *self.writer.lock() = Some(SegmentWriter::new(Box::new(file), sync_strategy));
        self.lifecycle.set(SegmentState::Active);
        Ok(())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Append a record and point the index at it
    ///
    /// Returns the frame's start offset.
    pub fn append(&self, record: &Record) -> Result<u64> {
        let frame = record::encode(record)?;

        let mut guard = self.writer.lock();
        let writer = guard
            .as_mut()
            .ok_or(SegKvError::SegmentClosed(self.id()))?;

        let offset = self.size.load(Ordering::Acquire);
        if let Err(e) = writer.write_frame(&frame) {
            // Drop any partial frame so later offsets stay aligned
            if let Err(trunc) = writer.sink.truncate_to(offset) {
                // The file now ends past `size`; appending more would
                // misplace every later frame. Stop accepting writes.
                tracing::error!(
                    segment = self.id(),
                    offset,
                    "Failed to roll back partial append, segment stops accepting writes: {}",
                    trunc
                );
                *guard = None;
            }
            return Err(e.into());
        }

        self.size.fetch_add(frame.len() as u64, Ordering::AcqRel);
        self.records.fetch_add(1, Ordering::Relaxed);
        self.index.insert(record.key.clone(), offset);

        Ok(offset)
    }

    /// Force buffered appends to disk
    pub fn sync(&self) -> Result<()> {
        if let Some(writer) = self.writer.lock().as_mut() {
            writer.sync()?;
        }
        Ok(())
    }

    /// Stop accepting appends: ACTIVE → CLOSED
    ///
    /// Waits for an in-flight append, syncs, then drops the append handle.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.writer.lock();
        if let Some(writer) = guard.as_mut() {
            writer.sync()?;
        }
        *guard = None;
        self.lifecycle
            .transition(SegmentState::Active, SegmentState::Closed);
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Offset of the last record for `key` in this segment (no file I/O)
    pub fn lookup(&self, key: &[u8]) -> Option<u64> {
        self.index.get(key)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.index.contains(key)
    }

    /// Decode the record at `offset`
    pub fn read(&self, offset: u64) -> Result<Record> {
        if offset >= self.size_bytes() {
            return Err(SegKvError::CorruptRecord {
                offset,
                reason: CorruptionKind::Truncated,
            });
        }

        let mut reader = self.reader.lock();
        reader.seek(SeekFrom::Start(offset))?;
        match record::read_frame(&mut *reader, offset)? {
            Some((record, _)) => Ok(record),
            None => Err(SegKvError::CorruptRecord {
                offset,
                reason: CorruptionKind::Truncated,
            }),
        }
    }

    /// Sequential scan over the file from offset 0
    pub fn scan(&self) -> Result<SegmentScanner> {
        SegmentScanner::open(self.path())
    }

    /// Snapshot of (key, last offset) pairs
    pub fn index_entries(&self) -> Vec<(Vec<u8>, u64)> {
        self.index.entries()
    }

    // =========================================================================
    // Index Rebuild
    // =========================================================================

    /// Scan the whole file and rebuild the index, last offset per key winning
    ///
    /// A frame cut short by the end of the file is an interrupted write: the
    /// file is truncated to the last full frame. Any other decode failure is
    /// structural corruption and aborts with `Recovery`.
    ///
    /// A corrupted length prefix can masquerade as a torn tail and cost the
    /// frames after it; `suspect_tail` flags the detectable cases.
    pub fn rebuild_index(&self) -> Result<RebuildReport> {
        let _writer = self.writer.lock();
        self.index.clear();

        let file_len = fs::metadata(self.path())?.len();
        let mut scanner = self.scan()?;
        let mut records = 0u64;
        let mut torn_at = None;

        for item in scanner.by_ref() {
            match item {
                Ok((offset, record)) => {
                    self.index.insert(record.key, offset);
                    records += 1;
                }
                Err(e) if e.is_truncation() => {
                    torn_at = Some(e);
                    break;
                }
                Err(e) => {
                    return Err(SegKvError::Recovery(format!(
                        "segment {} ({}): {}",
                        self.range,
                        self.path().display(),
                        e
                    )));
                }
            }
        }

        let valid_len = scanner.offset();
        let mut truncated_bytes = 0;
        let mut suspect_tail = false;
        if let Some(e) = torn_at {
            truncated_bytes = file_len - valid_len;
            // Frames carry no checksum, so a corrupt length prefix looks
            // exactly like an interrupted append. A claim larger than the
            // whole file is the one hint available.
            let claimed = torn_frame_claim(self.path(), valid_len)?;
            suspect_tail = claimed > file_len;
            if suspect_tail {
                tracing::error!(
                    segment = %self.range,
                    valid_len,
                    truncated_bytes,
                    claimed,
                    "Torn frame claims more bytes than the file holds; \
                     truncating, but this may be a corrupt length prefix: {}",
                    e
                );
            } else {
                tracing::warn!(
                    segment = %self.range,
                    valid_len,
                    truncated_bytes,
                    "Truncating torn tail: {}",
                    e
                );
            }
            let file = OpenOptions::new().write(true).open(self.path())?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        self.size.store(valid_len, Ordering::Release);
        self.records.store(records, Ordering::Relaxed);

        Ok(RebuildReport {
            records,
            keys: self.index.len(),
            truncated_bytes,
            suspect_tail,
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn state(&self) -> SegmentState {
        self.lifecycle.get()
    }

    /// Move `from` → `to` if the segment is currently in `from`
    pub fn transition(&self, from: SegmentState, to: SegmentState) -> bool {
        self.lifecycle.transition(from, to)
    }

    /// Mark RETIRED; the file is deleted when the last handle drops
    pub fn retire(&self) {
        self.lifecycle.set(SegmentState::Retired);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Ordering id (the last id in the segment's range)
    pub fn id(&self) -> SegmentId {
        self.range.last
    }

    pub fn range(&self) -> SegmentRange {
        self.range
    }

    pub fn path(&self) -> &Path {
        &self.lifecycle.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Frames written, including shadowed duplicates
    pub fn record_count(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    /// Distinct keys indexed
    pub fn key_count(&self) -> usize {
        self.index.len()
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("range", &self.range)
            .field("state", &self.state())
            .field("size", &self.size_bytes())
            .field("keys", &self.key_count())
            .finish()
    }
}

// =============================================================================
// Append Handle
// =============================================================================

/// Destination of segment appends
pub(crate) trait AppendSink: Write + Send {
    /// Cut the destination back to `len` bytes
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;

    fn sync_data(&mut self) -> io::Result<()>;
}

impl AppendSink for File {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync_data(&mut self) -> io::Result<()> {
        File::sync_data(self)
    }
}

struct SegmentWriter {
    sink: Box<dyn AppendSink>,
    sync_strategy: SyncStrategy,
    unsynced: usize,
}

impl SegmentWriter {
    fn new(sink: Box<dyn AppendSink>, sync_strategy: SyncStrategy) -> Self {
        Self {
            sink,
            sync_strategy,
            unsynced: 0,
        }
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.sink.write_all(frame)?;
        self.unsynced += 1;

        match self.sync_strategy {
            SyncStrategy::EveryWrite => self.sync(),
            SyncStrategy::EveryNEntries { count } if self.unsynced >= count => self.sync(),
            SyncStrategy::EveryNEntries { .. } => Ok(()),
        }
    }

    fn sync(&mut self) -> io::Result<()> {
        if self.unsynced > 0 {
            self.sink.sync_data()?;
            self.unsynced = 0;
        }
        Ok(())
    }
}

/// Frame length the header at `offset` claims, counting only the parts
/// of the header that are present
fn torn_frame_claim(path: &Path, offset: u64) -> Result<u64> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;

    let mut len_buf = [0u8; record::LEN_SIZE];
    if file.read_exact(&mut len_buf).is_err() {
        return Ok(0);
    }
    let key_len = u64::from(u32::from_le_bytes(len_buf));
    let mut claimed = record::LEN_SIZE as u64 + key_len + 1;

    file.seek(SeekFrom::Current(key_len as i64))?;
    let mut flag = [0u8; 1];
    if file.read_exact(&mut flag).is_ok()
        && flag[0] == record::FLAG_VALUE
        && file.read_exact(&mut len_buf).is_ok()
    {
        claimed += record::LEN_SIZE as u64 + u64::from(u32::from_le_bytes(len_buf));
    }

    Ok(claimed)
}

// =============================================================================
// Lifecycle Guard
// =============================================================================

/// State holder that deletes the backing file of a retired segment on drop
struct Lifecycle {
    path: PathBuf,
    state: AtomicU8,
}

impl Lifecycle {
    fn new(path: PathBuf, state: SegmentState) -> Self {
        Self {
            path,
            state: AtomicU8::new(state as u8),
        }
    }

    fn get(&self) -> SegmentState {
        SegmentState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set(&self, state: SegmentState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: SegmentState, to: SegmentState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if self.get() != SegmentState::Retired {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Deleted retired segment"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                "Failed to delete retired segment: {}",
                e
            ),
        }
    }
}
