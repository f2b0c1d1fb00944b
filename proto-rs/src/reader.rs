use crate::ResponseSnapshot;
use crate::writer::{FCS_MAGIC, FCS_VERSION, HEADER_SIZE, SnapshotHeader, codec};
use bincode::Options;
use std::io::{self, Read};

/// Reader for snapshot blobs
pub struct SnapshotReader<R: Read> {
    reader: R,
    header: Option<SnapshotHeader>,
}

impl<R: Read> SnapshotReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            header: None,
        }
    }

    /// Read and validate the blob header
    pub fn read_header(&mut self) -> io::Result<SnapshotHeader> {
        if let Some(ref header) = self.header {
            return Ok(header.clone());
        }

        let mut header_buf = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut header_buf)?;

        if header_buf[0..4] != FCS_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Invalid magic bytes - not a response snapshot",
            ));
        }

        let version = u32::from_be_bytes([header_buf[4], header_buf[5], header_buf[6], header_buf[7]]);
        if version != FCS_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unsupported snapshot version: {} (expected {})", version, FCS_VERSION),
            ));
        }

        let mut stored_at = [0u8; 8];
        stored_at.copy_from_slice(&header_buf[8..16]);
        let mut reserved = [0u8; 16];
        reserved.copy_from_slice(&header_buf[16..32]);

        let header = SnapshotHeader {
            magic: FCS_MAGIC,
            version,
            stored_at: u64::from_be_bytes(stored_at),
            reserved,
        };
        self.header = Some(header.clone());
        Ok(header)
    }

    /// Read the snapshot following the header
    pub fn read_snapshot(&mut self) -> io::Result<ResponseSnapshot> {
        if self.header.is_none() {
            self.read_header()?;
        }

        codec()
            .deserialize_from(&mut self.reader)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("Failed to decode snapshot: {}", e)))
    }

    pub fn header(&self) -> Option<&SnapshotHeader> {
        self.header.as_ref()
    }
}

/// Decode a blob produced by [`crate::encode_snapshot`]
pub fn decode_snapshot(blob: &[u8]) -> io::Result<(SnapshotHeader, ResponseSnapshot)> {
    let mut reader = SnapshotReader::new(blob);
    let header = reader.read_header()?;
    let snapshot = reader.read_snapshot()?;
    Ok((header, snapshot))
}
