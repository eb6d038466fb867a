//! Record codec
//!
//! Pure encoding and decoding of record frames. `decode` works on an
//! in-memory byte slice, `read_frame` pulls one frame off a reader
//! positioned at a frame boundary (used for segment reads and scans).

use std::io::{self, Read};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{Entry, Record};
use crate::error::{CorruptionKind, Result, SegKvError};

/// Width of the key and value length prefixes
pub const LEN_SIZE: usize = 4;

/// Flag byte for a record carrying a value
pub const FLAG_VALUE: u8 = 0;

/// Flag byte for a tombstone record
pub const FLAG_TOMBSTONE: u8 = 1;

/// Largest key or value a frame can describe
pub const MAX_FIELD_LEN: usize = u32::MAX as usize;

// =============================================================================
// Encoding
// =============================================================================

/// Number of bytes `encode` produces for this record
pub fn encoded_len(record: &Record) -> usize {
    let value_part = match &record.entry {
        Entry::Value(v) => LEN_SIZE + v.len(),
        Entry::Tombstone => 0,
    };
    LEN_SIZE + record.key.len() + 1 + value_part
}

/// Encode a record to its frame bytes
pub fn encode(record: &Record) -> Result<Bytes> {
    check_len("key", record.key.len())?;
    if let Entry::Value(v) = &record.entry {
        check_len("value", v.len())?;
    }

    let mut buf = BytesMut::with_capacity(encoded_len(record));
    buf.put_u32_le(record.key.len() as u32);
    buf.put_slice(&record.key);

    match &record.entry {
        Entry::Value(value) => {
            buf.put_u8(FLAG_VALUE);
            buf.put_u32_le(value.len() as u32);
            buf.put_slice(value);
        }
        Entry::Tombstone => buf.put_u8(FLAG_TOMBSTONE),
    }

    Ok(buf.freeze())
}

fn check_len(field: &'static str, len: usize) -> Result<()> {
    if len > MAX_FIELD_LEN {
        return Err(SegKvError::RecordTooLarge {
            field,
            len,
            max: MAX_FIELD_LEN,
        });
    }
    Ok(())
}

// =============================================================================
// Decoding (slice)
// =============================================================================

/// Decode the frame starting at `offset` within `bytes`
///
/// Returns the record and the offset of the byte following it.
pub fn decode(bytes: &[u8], offset: u64) -> Result<(Record, u64)> {
    let start = usize::try_from(offset)
        .ok()
        .filter(|&s| s <= bytes.len())
        .ok_or_else(|| corrupt(offset, CorruptionKind::Truncated))?;

    let mut buf = &bytes[start..];

    let key_len = take_len(&mut buf, offset)?;
    let key = take_bytes(&mut buf, key_len, offset)?;

    if !buf.has_remaining() {
        return Err(corrupt(offset, CorruptionKind::Truncated));
    }
    let entry = match buf.get_u8() {
        FLAG_VALUE => {
            let value_len = take_len(&mut buf, offset)?;
            Entry::Value(take_bytes(&mut buf, value_len, offset)?)
        }
        FLAG_TOMBSTONE => Entry::Tombstone,
        other => return Err(corrupt(offset, CorruptionKind::InvalidFlag(other))),
    };

    let consumed = (bytes.len() - start - buf.remaining()) as u64;
    Ok((Record { key, entry }, offset + consumed))
}

fn take_len(buf: &mut &[u8], offset: u64) -> Result<usize> {
    if buf.remaining() < LEN_SIZE {
        return Err(corrupt(offset, CorruptionKind::Truncated));
    }
    Ok(buf.get_u32_le() as usize)
}

fn take_bytes(buf: &mut &[u8], len: usize, offset: u64) -> Result<Vec<u8>> {
    if buf.remaining() < len {
        return Err(corrupt(offset, CorruptionKind::Truncated));
    }
    Ok(buf.copy_to_bytes(len).to_vec())
}

// =============================================================================
// Decoding (stream)
// =============================================================================

/// Read one frame from `reader`, which must be positioned at `offset`
///
/// Returns `Ok(None)` on a clean end of input (no bytes at all), and a
/// `CorruptRecord` error if the input ends partway through a frame.
pub fn read_frame<R: Read>(reader: &mut R, offset: u64) -> Result<Option<(Record, u64)>> {
    let mut len_buf = [0u8; LEN_SIZE];
    match read_full(reader, &mut len_buf)? {
        0 => return Ok(None),
        LEN_SIZE => {}
        _ => return Err(corrupt(offset, CorruptionKind::Truncated)),
    }
    let key_len = u32::from_le_bytes(len_buf) as usize;
    let key = read_exact_vec(reader, key_len, offset)?;

    let mut flag = [0u8; 1];
    if read_full(reader, &mut flag)? != 1 {
        return Err(corrupt(offset, CorruptionKind::Truncated));
    }

    let (entry, value_part) = match flag[0] {
        FLAG_VALUE => {
            if read_full(reader, &mut len_buf)? != LEN_SIZE {
                return Err(corrupt(offset, CorruptionKind::Truncated));
            }
            let value_len = u32::from_le_bytes(len_buf) as usize;
            let value = read_exact_vec(reader, value_len, offset)?;
            (Entry::Value(value), LEN_SIZE + value_len)
        }
        FLAG_TOMBSTONE => (Entry::Tombstone, 0),
        other => return Err(corrupt(offset, CorruptionKind::InvalidFlag(other))),
    };

    let frame_len = (LEN_SIZE + key_len + 1 + value_part) as u64;
    Ok(Some((Record { key, entry }, offset + frame_len)))
}

/// Fill `buf` as far as the reader allows; returns the bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read exactly `len` bytes without trusting `len` for the allocation
fn read_exact_vec<R: Read>(reader: &mut R, len: usize, offset: u64) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    reader.by_ref().take(len as u64).read_to_end(&mut out)?;
    if out.len() != len {
        return Err(corrupt(offset, CorruptionKind::Truncated));
    }
    Ok(out)
}

fn corrupt(offset: u64, reason: CorruptionKind) -> SegKvError {
    SegKvError::CorruptRecord { offset, reason }
}
