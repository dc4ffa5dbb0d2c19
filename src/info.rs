//! Header summary for the `info` command.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::header::VmaHeader;

#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub id:   u8,
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub name:  String,
    pub bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveInfo {
    pub uuid:        Uuid,
    pub created:     Option<DateTime<Utc>>,
    pub checksum:    String,
    pub header_size: u32,
    pub devices:     Vec<DeviceSummary>,
    pub configs:     Vec<ConfigSummary>,
}

impl ArchiveInfo {
    pub fn from_header(header: &VmaHeader) -> Result<Self> {
        let devices = header
            .present_devices()
            .map(|(id, dev)| {
                Ok(DeviceSummary { id, name: dev.name(&header.blobs)?, size: dev.size })
            })
            .collect::<Result<Vec<_>>>()?;
        let configs = header
            .config_slots()
            .map(|slot| {
                Ok(ConfigSummary {
                    name:  header.config_name(slot)?,
                    bytes: header.config_bytes(slot)?.len(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            uuid:        header.uuid,
            created:     header.created_at(),
            checksum:    hex::encode(header.checksum),
            header_size: header.header_size,
            devices,
            configs,
        })
    }

    /// Sum of declared device sizes.
    pub fn total_device_bytes(&self) -> u64 {
        self.devices.iter().map(|d| d.size).sum()
    }
}
