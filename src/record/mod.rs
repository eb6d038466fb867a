//! Record Module
//!
//! The unit of storage: a key paired with either a value or a tombstone.
//!
//! ## Frame Format
//! ```text
//! ┌──────────────┬───────────┬──────────┬──────────────┬─────────────┐
//! │ KeyLen (4)   │ Key       │ Flag (1) │ ValLen (4)   │ Value       │
//! │ u32 LE       │ KeyLen B  │ 0 | 1    │ u32 LE       │ ValLen B    │
//! └──────────────┴───────────┴──────────┴──────────────┴─────────────┘
//!                                         (ValLen and Value are absent
//!                                          when Flag = 1, tombstone)
//! ```
//!
//! Records are immutable once written. A key's current value is the
//! most recently appended record for it.

mod codec;

pub use codec::{
    decode, encode, encoded_len, read_frame, FLAG_TOMBSTONE, FLAG_VALUE, LEN_SIZE,
    MAX_FIELD_LEN,
};

/// Payload half of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// A live value
    Value(Vec<u8>),

    /// A tombstone (key deleted as of this record)
    Tombstone,
}

/// A single key/value or key/tombstone record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub entry: Entry,
}

impl Record {
    /// Create a record carrying a live value
    pub fn value(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            entry: Entry::Value(value.into()),
        }
    }

    /// Create a tombstone record for `key`
    pub fn tombstone(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            entry: Entry::Tombstone,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.entry, Entry::Tombstone)
    }
}
