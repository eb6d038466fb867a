//! Segment Builder
//!
//! Writes a complete segment in one pass (compaction output), building its
//! index and a running CRC32 of the bytes as it goes.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, SegKvError};
use crate::record::{self, Record};

use super::SegmentIndex;

/// Builder for a new segment file
pub struct SegmentBuilder {
    /// Output file path
    path: PathBuf,
    /// Buffered writer for performance
    writer: BufWriter<File>,
    /// Offset the next frame starts at
    current_offset: u64,
    /// Key → offset of the frame written for it
    index: HashMap<Vec<u8>, u64>,
    /// Frames written
    records: u64,
    /// Running CRC over every byte written
    hasher: crc32fast::Hasher,
}

/// A finished segment file, not yet committed
#[derive(Debug)]
pub struct BuiltSegment {
    pub path: PathBuf,
    pub index: HashMap<Vec<u8>, u64>,
    pub size: u64,
    pub records: u64,
    /// CRC32 of the whole file
    pub checksum: u32,
}

impl SegmentBuilder {
    /// Create (or overwrite) the output file
    pub fn new(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            current_offset: 0,
            index: HashMap::new(),
            records: 0,
            hasher: crc32fast::Hasher::new(),
        })
    }

    /// Append a record; returns its offset
    pub fn add(&mut self, record: &Record) -> Result<u64> {
        let frame = record::encode(record)?;
        let offset = self.current_offset;

        self.writer.write_all(&frame)?;
        self.hasher.update(&frame);

        self.index.insert(record.key.clone(), offset);
        self.current_offset += frame.len() as u64;
        self.records += 1;

        Ok(offset)
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    /// Flush and fsync the file
    pub fn finish(self) -> Result<BuiltSegment> {
        let file = self.writer.into_inner().map_err(|e| {
            SegKvError::Compaction(format!("Failed to flush segment: {}", e))
        })?;
        file.sync_all()?;

        Ok(BuiltSegment {
            path: self.path,
            index: self.index,
            size: self.current_offset,
            records: self.records,
            checksum: self.hasher.finalize(),
        })
    }
}

impl BuiltSegment {
    /// Re-read the file from disk and confirm length and checksum
    pub fn verify(&self) -> Result<()> {
        let on_disk = file_checksum(&self.path)?;
        let len = std::fs::metadata(&self.path)?.len();

        if len != self.size || on_disk != self.checksum {
            return Err(SegKvError::Compaction(format!(
                "Output {} failed verification: expected {} bytes crc {:08x}, found {} bytes crc {:08x}",
                self.path.display(),
                self.size,
                self.checksum,
                len,
                on_disk
            )));
        }
        Ok(())
    }

    /// Take the index for handing to a `Segment`
    pub fn take_index(&mut self) -> SegmentIndex {
        SegmentIndex::from_map(std::mem::take(&mut self.index))
    }
}

/// CRC32 of a whole file
pub fn file_checksum(path: &Path) -> Result<u32> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}
