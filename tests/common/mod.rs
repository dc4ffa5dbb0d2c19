//! Synthetic VMA archive builder for tests.

#![allow(dead_code)]

use md5::{Digest, Md5};
use vmax::{BlockInfo, CLUSTER_SIZE, SUB_BLOCK_SIZE};

pub const BLOB_OFFSET: usize = 12288;
pub const EXTENT_LEN: usize = 512;

pub struct ArchiveBuilder {
    pub uuid:    [u8; 16],
    pub ctime:   u64,
    /// Blob region as stored, starting with the pad byte at `BLOB_OFFSET`.
    blob_region: Vec<u8>,
    devices:     Vec<(u8, u32, u64)>,
    configs:     Vec<(u32, u32)>,
    body:        Vec<u8>,
}

impl ArchiveBuilder {
    pub fn new(uuid: [u8; 16]) -> Self {
        Self {
            uuid,
            ctime:       1_700_000_000,
            blob_region: vec![0u8],
            devices:     Vec::new(),
            configs:     Vec::new(),
            body:        Vec::new(),
        }
    }

    /// Append a blob and return its offset within the blob region.
    pub fn blob(&mut self, data: &[u8]) -> u32 {
        let offset = self.blob_region.len() as u32;
        self.blob_region.extend_from_slice(&(data.len() as u16).to_le_bytes());
        self.blob_region.extend_from_slice(data);
        offset
    }

    pub fn device(&mut self, id: u8, name: &str, size: u64) -> &mut Self {
        let mut raw = name.as_bytes().to_vec();
        raw.push(0);
        let off = self.blob(&raw);
        self.devices.push((id, off, size));
        self
    }

    pub fn config(&mut self, name: &str, data: &[u8]) -> &mut Self {
        let mut raw = name.as_bytes().to_vec();
        raw.push(0);
        let name_off = self.blob(&raw);
        let data_off = self.blob(data);
        self.configs.push((name_off, data_off));
        self
    }

    /// Append an extent record followed by `payload`.
    pub fn extent(&mut self, blocks: &[BlockInfo], payload: &[u8]) -> &mut Self {
        let uuid = self.uuid;
        self.extent_with_uuid(uuid, blocks, payload)
    }

    pub fn extent_with_uuid(&mut self, uuid: [u8; 16], blocks: &[BlockInfo], payload: &[u8]) -> &mut Self {
        assert!(blocks.len() <= 59);
        let mut raw = vec![0u8; EXTENT_LEN];
        raw[0..4].copy_from_slice(b"VMAE");
        raw[6..8].copy_from_slice(&(blocks.len() as u16).to_be_bytes());
        raw[8..24].copy_from_slice(&uuid);
        for (i, b) in blocks.iter().enumerate() {
            let at = 40 + i * 8;
            raw[at..at + 2].copy_from_slice(&b.mask.to_be_bytes());
            raw[at + 3] = b.device_id;
            raw[at + 4..at + 8].copy_from_slice(&b.cluster.to_be_bytes());
        }
        let sum = md5_zeroed(&raw, 24);
        raw[24..40].copy_from_slice(&sum);
        self.body.extend_from_slice(&raw);
        self.body.extend_from_slice(payload);
        self
    }

    pub fn header_size(&self) -> usize {
        (BLOB_OFFSET + self.blob_region.len()).div_ceil(512) * 512
    }

    pub fn build(&self) -> Vec<u8> {
        let header_size = self.header_size();
        let mut h = vec![0u8; header_size];
        h[0..4].copy_from_slice(b"VMA\0");
        h[4..8].copy_from_slice(&1u32.to_be_bytes());
        h[8..24].copy_from_slice(&self.uuid);
        h[24..32].copy_from_slice(&self.ctime.to_be_bytes());
        h[48..52].copy_from_slice(&(BLOB_OFFSET as u32).to_be_bytes());
        h[52..56].copy_from_slice(&(self.blob_region.len() as u32).to_be_bytes());
        h[56..60].copy_from_slice(&(header_size as u32).to_be_bytes());
        for (slot, &(name_off, data_off)) in self.configs.iter().enumerate() {
            let at = 2044 + slot * 4;
            h[at..at + 4].copy_from_slice(&name_off.to_be_bytes());
            let at = 3068 + slot * 4;
            h[at..at + 4].copy_from_slice(&data_off.to_be_bytes());
        }
        for &(id, name_off, size) in &self.devices {
            let at = 4096 + id as usize * 32;
            h[at..at + 4].copy_from_slice(&name_off.to_be_bytes());
            h[at + 8..at + 16].copy_from_slice(&size.to_be_bytes());
        }
        h[BLOB_OFFSET..BLOB_OFFSET + self.blob_region.len()].copy_from_slice(&self.blob_region);
        let sum = md5_zeroed(&h, 32);
        h[32..48].copy_from_slice(&sum);

        h.extend_from_slice(&self.body);
        h
    }
}

pub fn md5_zeroed(region: &[u8], at: usize) -> [u8; 16] {
    let mut copy = region.to_vec();
    copy[at..at + 16].fill(0);
    Md5::digest(&copy).into()
}

pub fn block(mask: u16, device_id: u8, cluster: u32) -> BlockInfo {
    BlockInfo { mask, device_id, cluster }
}

/// A full cluster whose bytes encode `seed` and their position.
pub fn pattern_cluster(seed: u8) -> Vec<u8> {
    (0..CLUSTER_SIZE).map(|i| seed.wrapping_mul(31).wrapping_add((i % 253) as u8)).collect()
}

/// Payload for `mask` taken from `cluster`, plus the cluster as it should
/// be reconstructed.
pub fn partial_payload(mask: u16, cluster: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut payload = Vec::new();
    let mut expected = vec![0u8; CLUSTER_SIZE];
    for bit in 0..16 {
        if mask & (1 << bit) != 0 {
            let range = bit * SUB_BLOCK_SIZE..(bit + 1) * SUB_BLOCK_SIZE;
            payload.extend_from_slice(&cluster[range.clone()]);
            expected[range.clone()].copy_from_slice(&cluster[range]);
        }
    }
    (payload, expected)
}
