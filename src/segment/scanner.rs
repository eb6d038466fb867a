//! Segment Scanner
//!
//! Sequential iteration over every frame in a segment file.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::Result;
use crate::record::{self, Record};

/// Iterator over `(offset, record)` pairs in write order
///
/// Stops after the first error; the offset of the failing frame is
/// available through [`SegmentScanner::offset`].
pub struct SegmentScanner {
    reader: BufReader<File>,
    /// Offset of the next frame to read
    offset: u64,
    done: bool,
}

impl SegmentScanner {
    /// Open a scanner at the start of the file
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            offset: 0,
            done: false,
        })
    }

    /// Offset of the next frame (the last valid boundary after an error)
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Iterator for SegmentScanner {
    type Item = Result<(u64, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match record::read_frame(&mut self.reader, self.offset) {
            Ok(Some((record, next))) => {
                let start = self.offset;
                self.offset = next;
                Some(Ok((start, record)))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
