use crate::ResponseSnapshot;
use bincode::Options;
use std::io::{self, Write};

// Blob format constants
pub const FCS_MAGIC: [u8; 4] = [0x46, 0x43, 0x53, 0x31]; // "FCS1"
pub const FCS_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 32;

/// Header written in front of every encoded snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub stored_at: u64, // Unix timestamp in milliseconds
    pub reserved: [u8; 16],
}

impl SnapshotHeader {
    /// Create a new header stamped with the current time
    pub fn new() -> Self {
        Self::with_timestamp(crate::now_millis().max(0) as u64)
    }

    /// Create a new header with a specific timestamp
    pub fn with_timestamp(stored_at: u64) -> Self {
        Self {
            magic: FCS_MAGIC,
            version: FCS_VERSION,
            stored_at,
            reserved: [0; 16],
        }
    }
}

impl Default for SnapshotHeader {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
}

/// Writer for snapshot blobs
pub struct SnapshotWriter<W: Write> {
    writer: W,
    header_written: bool,
}

impl<W: Write> SnapshotWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            header_written: false,
        }
    }

    pub fn write_header(&mut self, header: &SnapshotHeader) -> io::Result<()> {
        if self.header_written {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Header already written",
            ));
        }

        self.writer.write_all(&header.magic)?;
        self.writer.write_all(&header.version.to_be_bytes())?;
        self.writer.write_all(&header.stored_at.to_be_bytes())?;
        self.writer.write_all(&header.reserved)?;

        self.header_written = true;
        Ok(())
    }

    /// Write one snapshot. The header must come first.
    pub fn write_snapshot(&mut self, snapshot: &ResponseSnapshot) -> io::Result<()> {
        if !self.header_written {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Header must be written before a snapshot",
            ));
        }

        let encoded = codec()
            .serialize(snapshot)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.writer.write_all(&encoded)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub fn header_written(&self) -> bool {
        self.header_written
    }
}

/// Encode a snapshot into a standalone blob (header + body)
pub fn encode_snapshot(snapshot: &ResponseSnapshot, stored_at: u64) -> io::Result<Vec<u8>> {
    let mut writer = SnapshotWriter::new(Vec::with_capacity(HEADER_SIZE + snapshot.body.len() + 64));
    writer.write_header(&SnapshotHeader::with_timestamp(stored_at))?;
    writer.write_snapshot(snapshot)?;
    Ok(writer.into_inner())
}
