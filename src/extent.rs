//! Extent records and their block-info entries.
//!
//! # Layout (big-endian, 512 bytes)
//! ```text
//!    0  magic "VMAE"
//!    4  reserved (2 B)
//!    6  block count (u16, informational)
//!    8  archive uuid (16 B)
//!   24  md5 checksum (16 B, zero while hashing)
//!   40  59 × block-info { mask u16, reserved u8, device id u8, cluster u32 }
//! ```
//! The cluster payloads described by the block-infos follow the record
//! directly, in block-info order.

use byteorder::{BigEndian, ByteOrder};
use std::io::{Read, Seek};
use uuid::Uuid;

use crate::checksum::{digest_with_zeroed_field, CHECKSUM_LEN};
use crate::cursor::ArchiveCursor;
use crate::error::{Result, VmaError};

pub const EXTENT_MAGIC: &[u8; 4] = b"VMAE";
pub const BLOCKS_PER_EXTENT: usize = 59;
pub const BLOCK_INFO_LEN: usize = 8;
pub const EXTENT_HEADER_LEN: usize = 40 + BLOCKS_PER_EXTENT * BLOCK_INFO_LEN;
pub const EXTENT_CHECKSUM_OFFSET: usize = 24;

pub const CLUSTER_SIZE: usize = 65536;
pub const SUB_BLOCK_SIZE: usize = 4096;
pub const SUB_BLOCKS_PER_CLUSTER: usize = CLUSTER_SIZE / SUB_BLOCK_SIZE;
pub const FULL_MASK: u16 = 0xFFFF;

/// How a cluster's bytes are stored in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Every sub-block present: 65536 payload bytes follow.
    Full,
    /// No sub-block present: nothing follows, the cluster is all zeros.
    Zero,
    /// Only the sub-blocks whose mask bit is set follow, lowest bit first.
    Partial(u16),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockInfo {
    pub mask:      u16,
    /// Index into the header's device table. Zero marks an unused entry.
    pub device_id: u8,
    pub cluster:   u32,
}

impl BlockInfo {
    pub fn decode(raw: &[u8]) -> Self {
        Self {
            mask:      BigEndian::read_u16(&raw[0..2]),
            device_id: raw[3],
            cluster:   BigEndian::read_u32(&raw[4..8]),
        }
    }

    pub fn is_used(&self) -> bool {
        self.device_id != 0
    }

    pub fn disposition(&self) -> Disposition {
        match self.mask {
            FULL_MASK => Disposition::Full,
            0         => Disposition::Zero,
            mask      => Disposition::Partial(mask),
        }
    }

    /// Absolute byte offset of the cluster within its device image.
    pub fn device_offset(&self) -> u64 {
        self.cluster as u64 * CLUSTER_SIZE as u64
    }

    /// Number of payload bytes this entry consumes from the stream.
    pub fn payload_len(&self) -> usize {
        self.mask.count_ones() as usize * SUB_BLOCK_SIZE
    }
}

#[derive(Debug, Clone)]
pub struct ExtentHeader {
    /// Archive offset of the record's first byte.
    pub offset:      u64,
    /// Declared entry count.  Iteration always covers all 59 slots.
    pub block_count: u16,
    pub uuid:        Uuid,
    pub checksum:    [u8; CHECKSUM_LEN],
    pub blocks:      [BlockInfo; BLOCKS_PER_EXTENT],
}

impl ExtentHeader {
    /// Decode the extent record at the cursor.
    ///
    /// Fails with `IdentityMismatch` when the record carries a different
    /// archive UUID, and with `Integrity` when `verify_checksum` is set and
    /// the record's MD5 does not match.
    pub fn read<R: Read + Seek>(
        cursor:          &mut ArchiveCursor<R>,
        archive_uuid:    &Uuid,
        verify_checksum: bool,
    ) -> Result<Self> {
        let offset = cursor.position();
        let raw = cursor.read_array::<EXTENT_HEADER_LEN>()?;

        if &raw[0..4] != EXTENT_MAGIC {
            return Err(VmaError::format(offset, format!(
                "bad extent magic {}", hex::encode(&raw[0..4])
            )));
        }
        let block_count = BigEndian::read_u16(&raw[6..8]);

        let mut uuid_bytes = [0u8; 16];
        uuid_bytes.copy_from_slice(&raw[8..24]);
        let uuid = Uuid::from_bytes(uuid_bytes);
        if &uuid != archive_uuid {
            return Err(VmaError::IdentityMismatch {
                offset,
                expected: *archive_uuid,
                found:    uuid,
            });
        }

        let mut checksum = [0u8; CHECKSUM_LEN];
        checksum.copy_from_slice(&raw[EXTENT_CHECKSUM_OFFSET..EXTENT_CHECKSUM_OFFSET + CHECKSUM_LEN]);
        if verify_checksum {
            let computed = digest_with_zeroed_field(&raw, EXTENT_CHECKSUM_OFFSET);
            if computed != checksum {
                return Err(VmaError::Integrity {
                    region:   "extent",
                    offset,
                    declared: hex::encode(checksum),
                    computed: hex::encode(computed),
                });
            }
        }

        let blocks = std::array::from_fn(|i| {
            let at = 40 + i * BLOCK_INFO_LEN;
            BlockInfo::decode(&raw[at..at + BLOCK_INFO_LEN])
        });

        Ok(Self { offset, block_count, uuid, checksum, blocks })
    }

    /// Entries with a non-zero device id, in stream order.
    pub fn used_blocks(&self) -> impl Iterator<Item = &BlockInfo> {
        self.blocks.iter().filter(|b| b.is_used())
    }

    /// Payload bytes following this record.
    pub fn payload_len(&self) -> u64 {
        self.used_blocks().map(|b| b.payload_len() as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn raw_extent(uuid: &Uuid, entries: &[BlockInfo]) -> Vec<u8> {
        let mut raw = vec![0u8; EXTENT_HEADER_LEN];
        raw[0..4].copy_from_slice(EXTENT_MAGIC);
        raw[6..8].copy_from_slice(&(entries.len() as u16).to_be_bytes());
        raw[8..24].copy_from_slice(uuid.as_bytes());
        for (i, b) in entries.iter().enumerate() {
            let at = 40 + i * BLOCK_INFO_LEN;
            raw[at..at + 2].copy_from_slice(&b.mask.to_be_bytes());
            raw[at + 3] = b.device_id;
            raw[at + 4..at + 8].copy_from_slice(&b.cluster.to_be_bytes());
        }
        let sum = digest_with_zeroed_field(&raw, EXTENT_CHECKSUM_OFFSET);
        raw[24..40].copy_from_slice(&sum);
        raw
    }

    #[test]
    fn record_is_512_bytes() {
        assert_eq!(EXTENT_HEADER_LEN, 512);
    }

    #[test]
    fn decodes_block_infos() {
        let uuid = Uuid::from_bytes([9; 16]);
        let entries = [
            BlockInfo { mask: FULL_MASK, device_id: 1, cluster: 7 },
            BlockInfo { mask: 0, device_id: 2, cluster: 0 },
            BlockInfo { mask: 0b11, device_id: 1, cluster: 8 },
        ];
        let raw = raw_extent(&uuid, &entries);
        let mut c = ArchiveCursor::new(Cursor::new(raw)).unwrap();
        let ext = ExtentHeader::read(&mut c, &uuid, true).unwrap();

        assert_eq!(ext.block_count, 3);
        assert_eq!(&ext.blocks[..3], &entries);
        assert_eq!(ext.used_blocks().count(), 3);
        assert_eq!(ext.payload_len(), (CLUSTER_SIZE + 2 * SUB_BLOCK_SIZE) as u64);
        assert_eq!(ext.blocks[0].disposition(), Disposition::Full);
        assert_eq!(ext.blocks[1].disposition(), Disposition::Zero);
        assert_eq!(ext.blocks[2].disposition(), Disposition::Partial(0b11));
        assert_eq!(ext.blocks[0].device_offset(), 7 * 65536);
        assert_eq!(c.position(), 512);
    }

    #[test]
    fn foreign_uuid_is_rejected() {
        let raw = raw_extent(&Uuid::from_bytes([1; 16]), &[]);
        let mut c = ArchiveCursor::new(Cursor::new(raw)).unwrap();
        let err = ExtentHeader::read(&mut c, &Uuid::from_bytes([2; 16]), false).unwrap_err();
        assert!(matches!(err, VmaError::IdentityMismatch { offset: 0, .. }));
    }

    #[test]
    fn corrupted_entry_fails_checksum_unless_disabled() {
        let uuid = Uuid::from_bytes([3; 16]);
        let mut raw = raw_extent(&uuid, &[BlockInfo { mask: 0, device_id: 1, cluster: 1 }]);
        raw[47] ^= 0x01;

        let mut c = ArchiveCursor::new(Cursor::new(raw.clone())).unwrap();
        assert!(matches!(
            ExtentHeader::read(&mut c, &uuid, true),
            Err(VmaError::Integrity { region: "extent", .. })
        ));

        let mut c = ArchiveCursor::new(Cursor::new(raw)).unwrap();
        let ext = ExtentHeader::read(&mut c, &uuid, false).unwrap();
        assert_eq!(ext.blocks[0].cluster, 0);
    }

    #[test]
    fn bad_magic_is_format_error() {
        let mut raw = raw_extent(&Uuid::nil(), &[]);
        raw[3] = b'X';
        let mut c = ArchiveCursor::new(Cursor::new(raw)).unwrap();
        assert!(matches!(
            ExtentHeader::read(&mut c, &Uuid::nil(), true),
            Err(VmaError::Format { offset: 0, .. })
        ));
    }

    #[test]
    fn unused_entries_are_skipped_regardless_of_block_count() {
        let uuid = Uuid::nil();
        let mut raw = raw_extent(&uuid, &[
            BlockInfo { mask: 0, device_id: 0, cluster: 5 },
            BlockInfo { mask: 0, device_id: 3, cluster: 6 },
        ]);
        raw[6..8].copy_from_slice(&1u16.to_be_bytes());
        let mut c = ArchiveCursor::new(Cursor::new(raw)).unwrap();
        let ext = ExtentHeader::read(&mut c, &uuid, false).unwrap();
        let used: Vec<u32> = ext.used_blocks().map(|b| b.cluster).collect();
        assert_eq!(used, vec![6]);
    }
}
