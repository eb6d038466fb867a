//! Error types for SegKV
//!
//! Provides a unified error type for all operations.
//!
//! Absent and deleted keys are not errors: segment-set reads return a
//! [`Lookup`](crate::segment::Lookup) and the engine maps both to `None`.

use thiserror::Error;

use crate::segment::SegmentId;

/// Result type alias using SegKvError
pub type Result<T> = std::result::Result<T, SegKvError>;

/// Unified error type for SegKV operations
#[derive(Debug, Error)]
pub enum SegKvError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Record Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt record at offset {offset}: {reason}")]
    CorruptRecord { offset: u64, reason: CorruptionKind },

    #[error("Record field too large: {field} is {len} bytes (max {max})")]
    RecordTooLarge {
        field: &'static str,
        len: usize,
        max: usize,
    },

    // -------------------------------------------------------------------------
    // Segment Errors
    // -------------------------------------------------------------------------
    #[error("Segment {0} is not accepting writes")]
    SegmentClosed(SegmentId),

    #[error("Segment {0} not found")]
    SegmentNotFound(SegmentId),

    #[error("Recovery failed: {0}")]
    Recovery(String),

    // -------------------------------------------------------------------------
    // Compaction Errors
    // -------------------------------------------------------------------------
    #[error("Compaction error: {0}")]
    Compaction(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Why a frame failed to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionKind {
    /// The frame extends past the end of the available bytes
    Truncated,

    /// The tombstone flag byte is neither 0 nor 1
    InvalidFlag(u8),
}

impl std::fmt::Display for CorruptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorruptionKind::Truncated => write!(f, "frame truncated"),
            CorruptionKind::InvalidFlag(flag) => write!(f, "invalid tombstone flag 0x{:02x}", flag),
        }
    }
}

impl SegKvError {
    /// True if this is a torn frame at the end of the input
    pub fn is_truncation(&self) -> bool {
        matches!(
            self,
            SegKvError::CorruptRecord {
                reason: CorruptionKind::Truncated,
                ..
            }
        )
    }
}
