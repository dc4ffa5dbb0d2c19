//! Blob table: the size-prefixed byte region embedded in the header.
//!
//! Strings (device names, config file names) and config file contents are
//! stored once in this region and referenced elsewhere by their byte offset
//! relative to the region start.

use std::collections::HashMap;
use std::io::{Read, Seek};

use crate::cursor::ArchiveCursor;
use crate::error::{Result, VmaError};

#[derive(Debug, Clone, Default)]
pub struct BlobTable {
    blobs: HashMap<u32, Vec<u8>>,
}

impl BlobTable {
    /// Decode records from the cursor position up to `end`.
    ///
    /// Each record is a little-endian `u16` length followed by that many
    /// bytes.  Keys are record start offsets relative to `base`.
    pub fn parse<R: Read + Seek>(
        cursor: &mut ArchiveCursor<R>,
        base:   u64,
        end:    u64,
    ) -> Result<Self> {
        let mut blobs = HashMap::new();
        while cursor.position() < end {
            let start = cursor.position();
            if start + 2 > end {
                return Err(VmaError::format(start, format!(
                    "blob length prefix crosses region end {end}"
                )));
            }
            let len = cursor.read_u16_le()? as u64;
            if cursor.position() + len > end {
                return Err(VmaError::format(start, format!(
                    "blob of {len} bytes overruns region end {end}"
                )));
            }
            let data = cursor.read_vec(len as usize)?;
            blobs.insert((start - base) as u32, data);
        }
        Ok(Self { blobs })
    }

    pub fn get(&self, offset: u32) -> Option<&[u8]> {
        self.blobs.get(&offset).map(Vec::as_slice)
    }

    /// Look up a blob, failing with `Reference` when absent.
    pub fn resolve(&self, offset: u32, referrer: &str) -> Result<&[u8]> {
        self.get(offset).ok_or_else(|| VmaError::Reference {
            blob_offset: offset,
            referrer:    referrer.to_owned(),
        })
    }

    /// Resolve a blob as text, cut at the first NUL byte.
    pub fn resolve_str(&self, offset: u32, referrer: &str) -> Result<String> {
        let raw = self.resolve(offset, referrer)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn record(data: &[u8]) -> Vec<u8> {
        let mut out = (data.len() as u16).to_le_bytes().to_vec();
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn keys_are_relative_to_base() {
        let mut region = vec![0xEEu8; 3]; // bytes before the region
        region.extend(record(b"drive-scsi0\0"));
        region.extend(record(b"qemu-server.conf\0"));
        let end = region.len() as u64;

        let mut c = ArchiveCursor::new(Cursor::new(region)).unwrap();
        c.seek_to(3).unwrap();
        let table = BlobTable::parse(&mut c, 3, end).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve_str(0, "test").unwrap(), "drive-scsi0");
        assert_eq!(table.resolve_str(14, "test").unwrap(), "qemu-server.conf");
        assert_eq!(c.position(), end);
    }

    #[test]
    fn missing_offset_is_reference_error() {
        let table = BlobTable::default();
        assert!(matches!(
            table.resolve(42, "device 1"),
            Err(VmaError::Reference { blob_offset: 42, .. })
        ));
    }

    #[test]
    fn overrun_is_format_error() {
        let mut region = record(b"abc");
        region.extend_from_slice(&10u16.to_le_bytes());
        region.extend_from_slice(b"short");
        let end = region.len() as u64;
        let mut c = ArchiveCursor::new(Cursor::new(region)).unwrap();
        assert!(matches!(
            BlobTable::parse(&mut c, 0, end),
            Err(VmaError::Format { offset: 5, .. })
        ));
    }
}
