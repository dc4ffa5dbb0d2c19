//! Archive header: identity, config slots, device table and blob table.
//!
//! # Layout (big-endian)
//! ```text
//!      0  magic "VMA\0"
//!      4  version (u32, must be 1)
//!      8  uuid (16 B)
//!     24  ctime (u64, seconds since the epoch)
//!     32  md5 checksum (16 B, zero while hashing)
//!     48  blob_buffer_offset, blob_buffer_size, header_size (3 × u32)
//!     60  reserved (1984 B)
//!   2044  config name offsets (256 × u32)
//!   3068  config data offsets (256 × u32)
//!   4092  reserved (4 B)
//!   4096  device descriptors (256 × 32 B)
//!  12288  reserved (1 B)
//!  12289  blob records until blob_buffer_offset + blob_buffer_size
//! ```
//! The header region ends at `header_size`; extents follow immediately.

use chrono::{DateTime, Utc};
use std::io::{Read, Seek};
use uuid::Uuid;

use crate::blob::BlobTable;
use crate::checksum::{digest_with_zeroed_field, CHECKSUM_LEN};
use crate::cursor::ArchiveCursor;
use crate::error::{Result, VmaError};

pub const MAGIC: &[u8; 4] = b"VMA\0";
pub const VERSION: u32 = 1;
pub const MAX_CONFIGS: usize = 256;
pub const MAX_DEVICES: usize = 256;
/// Start of the device table and the size of one descriptor.
pub const DEVICE_TABLE_OFFSET: u64 = 4096;
pub const DEVICE_ENTRY_LEN: u64 = 32;
/// Byte offset of the checksum field within the header.
pub const HEADER_CHECKSUM_OFFSET: usize = 32;
/// Bytes consumed by the fixed fields, up to and including the pad byte
/// that precedes the first blob record.
pub const FIXED_HEADER_LEN: u64 = 12289;

const RESERVED_AFTER_SIZES: u64 = 1984;

/// One entry of the device table.  A zero `size` marks an unused slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name_offset: u32,
    pub size:        u64,
}

impl DeviceInfo {
    fn read<R: Read + Seek>(cursor: &mut ArchiveCursor<R>) -> Result<Self> {
        let name_offset = cursor.read_u32_be()?;
        cursor.skip(4)?;
        let size = cursor.read_u64_be()?;
        cursor.skip(16)?;
        Ok(Self { name_offset, size })
    }

    pub fn is_present(&self) -> bool {
        self.size > 0
    }

    pub fn name(&self, blobs: &BlobTable) -> Result<String> {
        blobs.resolve_str(self.name_offset, "device name")
    }
}

/// A config file stored in the header: name blob and data blob offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigSlot {
    pub name_offset: u32,
    pub data_offset: u32,
}

#[derive(Debug, Clone)]
pub struct VmaHeader {
    pub uuid:               Uuid,
    pub ctime:              u64,
    pub checksum:           [u8; CHECKSUM_LEN],
    pub blob_buffer_offset: u32,
    pub blob_buffer_size:   u32,
    pub header_size:        u32,
    pub config_names:       Vec<u32>,
    pub config_data:        Vec<u32>,
    pub devices:            Vec<DeviceInfo>,
    pub blobs:              BlobTable,
}

impl VmaHeader {
    /// Parse the header from offset 0 and leave the cursor at `header_size`.
    ///
    /// With `verify_checksum` set, the header bytes are re-read and their
    /// MD5 compared against the declared one.  Without it no digest is
    /// computed at all.
    pub fn read<R: Read + Seek>(cursor: &mut ArchiveCursor<R>, verify_checksum: bool) -> Result<Self> {
        cursor.seek_to(0)?;

        let magic = cursor.read_array::<4>()?;
        if &magic != MAGIC {
            return Err(VmaError::format(0, format!("bad header magic {}", hex::encode(magic))));
        }
        let version = cursor.read_u32_be()?;
        if version != VERSION {
            return Err(VmaError::format(4, format!("unsupported version {version}")));
        }
        let uuid     = Uuid::from_bytes(cursor.read_array::<16>()?);
        let ctime    = cursor.read_u64_be()?;
        let checksum = cursor.read_array::<CHECKSUM_LEN>()?;
        let blob_buffer_offset = cursor.read_u32_be()?;
        let blob_buffer_size   = cursor.read_u32_be()?;
        let header_size        = cursor.read_u32_be()?;

        let blob_end = blob_buffer_offset as u64 + blob_buffer_size as u64;
        if (header_size as u64) < FIXED_HEADER_LEN {
            return Err(VmaError::format(56, format!(
                "header size {header_size} is smaller than the fixed layout ({FIXED_HEADER_LEN})"
            )));
        }
        let stream_len = cursor.stream_len()?;
        if header_size as u64 > stream_len {
            return Err(VmaError::TruncatedArchive {
                offset:   0,
                expected: header_size as usize,
                actual:   stream_len as usize,
            });
        }
        if blob_end > header_size as u64 {
            return Err(VmaError::format(48, format!(
                "blob region ends at {blob_end}, past header end {header_size}"
            )));
        }
        if blob_buffer_offset as u64 > FIXED_HEADER_LEN {
            return Err(VmaError::format(48, format!(
                "blob region starts at {blob_buffer_offset}, after the device table"
            )));
        }

        cursor.skip(RESERVED_AFTER_SIZES)?;
        let config_names = (0..MAX_CONFIGS)
            .map(|_| cursor.read_u32_be())
            .collect::<Result<Vec<_>>>()?;
        let config_data = (0..MAX_CONFIGS)
            .map(|_| cursor.read_u32_be())
            .collect::<Result<Vec<_>>>()?;
        cursor.skip(4)?;
        let devices = (0..MAX_DEVICES)
            .map(|_| DeviceInfo::read(cursor))
            .collect::<Result<Vec<_>>>()?;
        cursor.skip(1)?;

        let blobs = BlobTable::parse(cursor, blob_buffer_offset as u64, blob_end)?;

        cursor.seek_to(header_size as u64)?;

        let header = Self {
            uuid,
            ctime,
            checksum,
            blob_buffer_offset,
            blob_buffer_size,
            header_size,
            config_names,
            config_data,
            devices,
            blobs,
        };

        if verify_checksum {
            header.verify_checksum(cursor)?;
        } else {
            tracing::warn!("header checksum validation disabled");
        }

        // Surface dangling device names before any output is created.
        for (id, dev) in header.present_devices() {
            dev.name(&header.blobs).map_err(|e| match e {
                VmaError::Reference { blob_offset, .. } => VmaError::Reference {
                    blob_offset,
                    referrer: format!("device {id} name"),
                },
                other => other,
            })?;
        }

        Ok(header)
    }

    fn verify_checksum<R: Read + Seek>(&self, cursor: &mut ArchiveCursor<R>) -> Result<()> {
        let resume = cursor.position();
        cursor.seek_to(0)?;
        let region = cursor.read_vec(self.header_size as usize)?;
        cursor.seek_to(resume)?;

        let computed = digest_with_zeroed_field(&region, HEADER_CHECKSUM_OFFSET);
        if computed != self.checksum {
            return Err(VmaError::Integrity {
                region:   "header",
                offset:   0,
                declared: hex::encode(self.checksum),
                computed: hex::encode(computed),
            });
        }
        Ok(())
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::try_from(self.ctime).ok()?, 0)
    }

    /// Device slots with a non-zero size, keyed by device id.
    pub fn present_devices(&self) -> impl Iterator<Item = (u8, &DeviceInfo)> {
        self.devices
            .iter()
            .enumerate()
            .filter(|(_, d)| d.is_present())
            .map(|(id, d)| (id as u8, d))
    }

    pub fn device(&self, id: u8) -> Option<&DeviceInfo> {
        self.devices.get(id as usize).filter(|d| d.is_present())
    }

    pub fn device_name(&self, id: u8) -> Result<String> {
        let dev = self.device(id).ok_or(VmaError::UnknownDevice {
            offset: 0,
            device_id: id,
        })?;
        dev.name(&self.blobs)
    }

    /// Config slots whose name offset is non-zero.
    pub fn config_slots(&self) -> impl Iterator<Item = ConfigSlot> + '_ {
        self.config_names
            .iter()
            .zip(&self.config_data)
            .filter(|(&name, _)| name != 0)
            .map(|(&name_offset, &data_offset)| ConfigSlot { name_offset, data_offset })
    }

    pub fn config_name(&self, slot: ConfigSlot) -> Result<String> {
        self.blobs.resolve_str(slot.name_offset, "config name")
    }

    pub fn config_bytes(&self, slot: ConfigSlot) -> Result<&[u8]> {
        self.blobs.resolve(slot.data_offset, "config data")
    }
}
