//! Tests for the Record Codec
//!
//! These tests verify:
//! - Round-trip of values, tombstones, empty and large fields
//! - Bit-exact frame layout
//! - Injectivity (distinct records never share bytes)
//! - Truncation and invalid-flag detection
//! - Sequential decoding of concatenated frames

use std::io::Cursor;

use segkv::error::{CorruptionKind, SegKvError};
use segkv::record::{self, Entry, Record, FLAG_TOMBSTONE, FLAG_VALUE, LEN_SIZE};

// =============================================================================
// Helper Functions
// =============================================================================

fn round_trip(record: &Record) -> Record {
    let bytes = record::encode(record).unwrap();
    let (decoded, next) = record::decode(&bytes, 0).unwrap();
    assert_eq!(next, bytes.len() as u64);
    decoded
}

fn assert_corrupt(err: SegKvError, expected_offset: u64, expected: CorruptionKind) {
    match err {
        SegKvError::CorruptRecord { offset, reason } => {
            assert_eq!(offset, expected_offset);
            assert_eq!(reason, expected);
        }
        other => panic!("expected CorruptRecord, got {:?}", other),
    }
}

// =============================================================================
// Round-trip Tests
// =============================================================================

#[test]
fn test_round_trip_value() {
    let record = Record::value(b"hello".to_vec(), b"world".to_vec());
    assert_eq!(round_trip(&record), record);
}

#[test]
fn test_round_trip_tombstone() {
    let record = Record::tombstone(b"gone".to_vec());
    assert_eq!(round_trip(&record), record);
}

#[test]
fn test_round_trip_empty_key_and_value() {
    let record = Record::value(Vec::new(), Vec::new());
    assert_eq!(round_trip(&record), record);

    let tombstone = Record::tombstone(Vec::new());
    assert_eq!(round_trip(&tombstone), tombstone);
}

#[test]
fn test_round_trip_large_fields() {
    let key = vec![0xAB; 64 * 1024];
    let value: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let record = Record::value(key, value);
    assert_eq!(round_trip(&record), record);
}

#[test]
fn test_round_trip_binary_data() {
    let record = Record::value(vec![0, 1, 0xFF, 0], vec![FLAG_TOMBSTONE, 0, 0, 0, 0]);
    assert_eq!(round_trip(&record), record);
}

// =============================================================================
// Frame Layout Tests
// =============================================================================

#[test]
fn test_value_frame_layout() {
    let bytes = record::encode(&Record::value(b"ab".to_vec(), b"xyz".to_vec())).unwrap();

    let expected: Vec<u8> = [
        &2u32.to_le_bytes()[..],
        &b"ab"[..],
        &[FLAG_VALUE][..],
        &3u32.to_le_bytes()[..],
        &b"xyz"[..],
    ]
    .concat();

    assert_eq!(&bytes[..], &expected[..]);
}

#[test]
fn test_tombstone_frame_has_no_value_length() {
    let bytes = record::encode(&Record::tombstone(b"ab".to_vec())).unwrap();

    let expected: Vec<u8> = [&2u32.to_le_bytes()[..], &b"ab"[..], &[FLAG_TOMBSTONE][..]].concat();

    assert_eq!(&bytes[..], &expected[..]);
    assert_eq!(bytes.len(), LEN_SIZE + 2 + 1);
}

#[test]
fn test_encoded_len_matches_encode() {
    let records = [
        Record::value(b"k".to_vec(), b"v".to_vec()),
        Record::value(Vec::new(), vec![7; 300]),
        Record::tombstone(b"key".to_vec()),
    ];
    for r in &records {
        assert_eq!(record::encoded_len(r), record::encode(r).unwrap().len());
    }
}

#[test]
fn test_encoding_is_injective_for_tricky_pairs() {
    let pairs = [
        // Empty value vs tombstone
        (
            Record::value(b"k".to_vec(), Vec::new()),
            Record::tombstone(b"k".to_vec()),
        ),
        // Bytes moved between key and value
        (
            Record::value(b"ab".to_vec(), b"c".to_vec()),
            Record::value(b"a".to_vec(), b"bc".to_vec()),
        ),
        // Empty key vs empty value
        (
            Record::value(Vec::new(), b"x".to_vec()),
            Record::value(b"x".to_vec(), Vec::new()),
        ),
    ];

    for (a, b) in &pairs {
        assert_ne!(record::encode(a).unwrap(), record::encode(b).unwrap());
    }
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_decode_truncated_length_prefix() {
    let err = record::decode(&[5, 0], 0).unwrap_err();
    assert_corrupt(err, 0, CorruptionKind::Truncated);
}

#[test]
fn test_decode_length_past_end() {
    let mut bytes = record::encode(&Record::value(b"key".to_vec(), b"value".to_vec()))
        .unwrap()
        .to_vec();
    bytes.truncate(bytes.len() - 2);

    let err = record::decode(&bytes, 0).unwrap_err();
    assert!(err.is_truncation());
}

#[test]
fn test_decode_every_prefix_is_truncated() {
    let bytes = record::encode(&Record::value(b"key".to_vec(), b"value".to_vec())).unwrap();

    for cut in 0..bytes.len() {
        let err = record::decode(&bytes[..cut], 0).unwrap_err();
        assert!(err.is_truncation(), "prefix of {} bytes: {:?}", cut, err);
    }
}

#[test]
fn test_decode_invalid_flag() {
    let mut bytes = record::encode(&Record::tombstone(b"k".to_vec())).unwrap().to_vec();
    let flag_pos = LEN_SIZE + 1;
    bytes[flag_pos] = 7;

    let err = record::decode(&bytes, 0).unwrap_err();
    assert_corrupt(err, 0, CorruptionKind::InvalidFlag(7));
}

#[test]
fn test_decode_offset_past_end() {
    let bytes = record::encode(&Record::tombstone(b"k".to_vec())).unwrap();
    let err = record::decode(&bytes, 100).unwrap_err();
    assert_corrupt(err, 100, CorruptionKind::Truncated);
}

// =============================================================================
// Sequential Decoding Tests
// =============================================================================

#[test]
fn test_decode_concatenated_frames() {
    let records = vec![
        Record::value(b"a".to_vec(), b"1".to_vec()),
        Record::tombstone(b"b".to_vec()),
        Record::value(b"c".to_vec(), b"333".to_vec()),
    ];

    let mut log = Vec::new();
    for r in &records {
        log.extend_from_slice(&record::encode(r).unwrap());
    }

    let mut offset = 0;
    let mut decoded = Vec::new();
    while offset < log.len() as u64 {
        let (r, next) = record::decode(&log, offset).unwrap();
        assert!(next > offset);
        decoded.push(r);
        offset = next;
    }

    assert_eq!(decoded, records);
}

#[test]
fn test_read_frame_matches_decode() {
    let records = vec![
        Record::value(b"key1".to_vec(), b"value1".to_vec()),
        Record::tombstone(b"key2".to_vec()),
    ];
    let mut log = Vec::new();
    for r in &records {
        log.extend_from_slice(&record::encode(r).unwrap());
    }

    let mut cursor = Cursor::new(log.clone());
    let (first, next) = record::read_frame(&mut cursor, 0).unwrap().unwrap();
    assert_eq!(first, records[0]);
    assert_eq!((first.clone(), next), record::decode(&log, 0).unwrap());

    let (second, end) = record::read_frame(&mut cursor, next).unwrap().unwrap();
    assert_eq!(second.entry, Entry::Tombstone);
    assert_eq!(end, log.len() as u64);

    // Clean end of input
    assert!(record::read_frame(&mut cursor, end).unwrap().is_none());
}

#[test]
fn test_read_frame_partial_tail_is_truncation() {
    let bytes = record::encode(&Record::value(b"key".to_vec(), b"value".to_vec())).unwrap();
    let mut cursor = Cursor::new(bytes[..bytes.len() - 1].to_vec());

    let err = record::read_frame(&mut cursor, 42).unwrap_err();
    assert_corrupt(err, 42, CorruptionKind::Truncated);
}
