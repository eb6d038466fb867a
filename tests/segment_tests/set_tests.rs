//! Tests for the SegmentSet
//!
//! These tests verify:
//! - Reads resolve newest segment first
//! - Deleted vs never-written keys
//! - Rotation closes the active segment and starts the next id
//! - Eligibility for compaction
//! - Committing a compaction swaps inputs for the output atomically

use std::path::Path;
use std::sync::Arc;

use segkv::config::SyncStrategy;
use segkv::record::Record;
use segkv::segment::{Lookup, Segment, SegmentRange, SegmentSet, SegmentState};
use segkv::SegKvError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn open_set(dir: &Path) -> SegmentSet {
    let (set, _) = SegmentSet::recover(dir, SyncStrategy::EveryWrite).unwrap();
    set
}

fn put(set: &SegmentSet, key: &str, value: &str) {
    set.append(&Record::value(key.as_bytes(), value.as_bytes()))
        .unwrap();
}

fn del(set: &SegmentSet, key: &str) {
    set.append(&Record::tombstone(key.as_bytes())).unwrap();
}

fn found(value: &str) -> Lookup {
    Lookup::Found(value.as_bytes().to_vec())
}

// =============================================================================
// Read Path Tests
// =============================================================================

#[test]
fn test_fresh_set_has_one_active_segment() {
    let temp = TempDir::new().unwrap();
    let set = open_set(temp.path());

    assert_eq!(set.segment_count(), 1);
    assert_eq!(set.active_id(), 1);
    assert_eq!(set.next_id(), 2);
    assert_eq!(set.snapshot().active().state(), SegmentState::Active);
}

#[test]
fn test_get_found_deleted_not_found() {
    let temp = TempDir::new().unwrap();
    let set = open_set(temp.path());

    put(&set, "live", "v");
    put(&set, "gone", "v");
    del(&set, "gone");

    assert_eq!(set.get(b"live").unwrap(), found("v"));
    assert_eq!(set.get(b"gone").unwrap(), Lookup::Deleted);
    assert_eq!(set.get(b"never").unwrap(), Lookup::NotFound);
}

#[test]
fn test_newest_segment_wins_across_rotation() {
    let temp = TempDir::new().unwrap();
    let set = open_set(temp.path());

    put(&set, "key", "old");
    put(&set, "other", "kept");
    set.rotate().unwrap();
    put(&set, "key", "new");

    assert_eq!(set.get(b"key").unwrap(), found("new"));
    assert_eq!(set.get(b"other").unwrap(), found("kept"));
}

#[test]
fn test_tombstone_in_newer_segment_masks_older_value() {
    let temp = TempDir::new().unwrap();
    let set = open_set(temp.path());

    put(&set, "key", "value");
    set.rotate().unwrap();
    del(&set, "key");
    set.rotate().unwrap();

    assert_eq!(set.get(b"key").unwrap(), Lookup::Deleted);
}

#[test]
fn test_append_reports_position() {
    let temp = TempDir::new().unwrap();
    let set = open_set(temp.path());

    let first = set
        .append(&Record::value(b"a".to_vec(), b"1".to_vec()))
        .unwrap();
    let second = set
        .append(&Record::value(b"b".to_vec(), b"2".to_vec()))
        .unwrap();

    assert_eq!(first.segment, 1);
    assert_eq!(first.offset, 0);
    assert_eq!(second.offset, first.active_size);
    assert_eq!(second.active_size, set.snapshot().active().size_bytes());
}

// =============================================================================
// Rotation Tests
// =============================================================================

#[test]
fn test_rotate_closes_active_and_creates_next() {
    let temp = TempDir::new().unwrap();
    let set = open_set(temp.path());
    put(&set, "key", "value");

    let old = Arc::clone(set.snapshot().active());
    let new_id = set.rotate().unwrap();

    assert_eq!(new_id, 2);
    assert_eq!(old.state(), SegmentState::Closed);
    assert_eq!(set.active_id(), 2);
    assert_eq!(set.snapshot().ids(), vec![1, 2]);
    assert!(temp.path().join("segment_000002.seg").exists());

    let err = old
        .append(&Record::value(b"late".to_vec(), b"x".to_vec()))
        .unwrap_err();
    assert!(matches!(err, SegKvError::SegmentClosed(1)));
}

#[test]
fn test_snapshot_taken_before_rotation_stays_valid() {
    let temp = TempDir::new().unwrap();
    let set = open_set(temp.path());
    put(&set, "key", "value");

    let before = set.snapshot();
    set.rotate().unwrap();
    put(&set, "key", "newer");

    assert_eq!(before.len(), 1);
    assert_eq!(before.get(b"key").unwrap(), found("value"));
    assert_eq!(set.get(b"key").unwrap(), found("newer"));
}

#[test]
fn test_ids_strictly_increase() {
    let temp = TempDir::new().unwrap();
    let set = open_set(temp.path());

    for i in 0..5 {
        put(&set, &format!("k{}", i), "v");
        set.rotate().unwrap();
    }

    let ids = set.snapshot().ids();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

// =============================================================================
// Compaction Eligibility / Commit Tests
// =============================================================================

#[test]
fn test_eligible_excludes_active_and_compacting() {
    let temp = TempDir::new().unwrap();
    let set = open_set(temp.path());

    for _ in 0..3 {
        put(&set, "k", "v");
        set.rotate().unwrap();
    }
    assert_eq!(set.eligible_ids(), vec![1, 2, 3]);

    let snapshot = set.snapshot();
    assert!(snapshot.closed()[1].transition(SegmentState::Closed, SegmentState::Compacting));
    assert_eq!(set.eligible_ids(), vec![1, 3]);
}

#[test]
fn test_commit_compaction_swaps_run() {
    let temp = TempDir::new().unwrap();
    let set = open_set(temp.path());

    put(&set, "a", "1");
    set.rotate().unwrap();
    put(&set, "a", "2");
    put(&set, "b", "3");
    set.rotate().unwrap();

    let inputs: Vec<Arc<Segment>> = set.snapshot().closed().to_vec();
    let input_paths: Vec<_> = inputs.iter().map(|s| s.path().to_path_buf()).collect();

    // Hand-built output standing in for a merge of 1..=2
    let range = SegmentRange::span(1, 2);
    let output = Segment::create(temp.path(), 99, SyncStrategy::EveryWrite).unwrap();
    output
        .append(&Record::value(b"a".to_vec(), b"2".to_vec()))
        .unwrap();
    output
        .append(&Record::value(b"b".to_vec(), b"3".to_vec()))
        .unwrap();
    output.close().unwrap();
    let output_path = output.path().to_path_buf();
    drop(output);
    std::fs::rename(&output_path, range.path_in(temp.path())).unwrap();
    let (output, _) = Segment::open(&range.path_in(temp.path()), range).unwrap();

    set.commit_compaction(&[1, 2], Arc::new(output)).unwrap();

    let snapshot = set.snapshot();
    assert_eq!(snapshot.closed().len(), 1);
    assert_eq!(snapshot.closed()[0].range(), range);
    assert_eq!(set.get(b"a").unwrap(), found("2"));
    assert_eq!(set.get(b"b").unwrap(), found("3"));

    assert!(inputs.iter().all(|s| s.state() == SegmentState::Retired));
    assert!(input_paths.iter().all(|p| p.exists()));
    drop(inputs);
    assert!(input_paths.iter().all(|p| !p.exists()));
}

#[test]
fn test_commit_rejects_non_contiguous_inputs() {
    let temp = TempDir::new().unwrap();
    let set = open_set(temp.path());

    for _ in 0..3 {
        put(&set, "k", "v");
        set.rotate().unwrap();
    }

    let output = Segment::create(temp.path(), 50, SyncStrategy::EveryWrite).unwrap();
    output.close().unwrap();

    let err = set
        .commit_compaction(&[1, 3], Arc::new(output))
        .unwrap_err();
    assert!(matches!(err, SegKvError::Compaction(_)));
    assert_eq!(set.snapshot().ids(), vec![1, 2, 3, 4]);
}

#[test]
fn test_commit_rejects_unknown_inputs() {
    let temp = TempDir::new().unwrap();
    let set = open_set(temp.path());
    put(&set, "k", "v");
    set.rotate().unwrap();

    let output = Segment::create(temp.path(), 50, SyncStrategy::EveryWrite).unwrap();
    output.close().unwrap();

    let err = set
        .commit_compaction(&[7, 8], Arc::new(output))
        .unwrap_err();
    assert!(matches!(err, SegKvError::SegmentNotFound(7)));
}
