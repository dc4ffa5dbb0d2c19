//! Cluster reconstruction from the sequential payload stream.
//!
//! Payload bytes carry no framing of their own: the only link between a
//! block-info entry and its bytes is stream order.  Reads here must happen
//! on the single reader thread, one entry after another.

use std::io::{Read, Seek};

use crate::cursor::ArchiveCursor;
use crate::error::Result;
use crate::extent::{BlockInfo, Disposition, CLUSTER_SIZE, SUB_BLOCKS_PER_CLUSTER, SUB_BLOCK_SIZE};

/// Shared content of every all-zero cluster.  Never written to.
pub static ZERO_CLUSTER: [u8; CLUSTER_SIZE] = [0u8; CLUSTER_SIZE];

/// A materialised 65536-byte cluster.
#[derive(Debug)]
pub enum Cluster {
    /// Backed by [`ZERO_CLUSTER`].
    Zero,
    Data(Box<[u8]>),
}

impl Cluster {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Cluster::Zero    => &ZERO_CLUSTER,
            Cluster::Data(b) => b,
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Cluster::Zero)
    }
}

/// A cluster together with its destination.
#[derive(Debug)]
pub struct ClusterWrite {
    pub device_id: u8,
    pub offset:    u64,
    pub cluster:   Cluster,
}

/// Read the payload for `info` from the cursor and build its cluster.
///
/// Consumes exactly `info.payload_len()` bytes.
pub fn read_cluster<R: Read + Seek>(cursor: &mut ArchiveCursor<R>, info: &BlockInfo) -> Result<Cluster> {
    match info.disposition() {
        Disposition::Zero => Ok(Cluster::Zero),
        Disposition::Full => {
            let mut buf = vec![0u8; CLUSTER_SIZE].into_boxed_slice();
            cursor.read_exact(&mut buf)?;
            Ok(Cluster::Data(buf))
        }
        Disposition::Partial(mask) => {
            let mut buf = vec![0u8; CLUSTER_SIZE].into_boxed_slice();
            for bit in 0..SUB_BLOCKS_PER_CLUSTER {
                if mask & (1 << bit) != 0 {
                    let at = bit * SUB_BLOCK_SIZE;
                    cursor.read_exact(&mut buf[at..at + SUB_BLOCK_SIZE])?;
                }
            }
            Ok(Cluster::Data(buf))
        }
    }
}

/// Skip the payload for `info` without materialising it.
pub fn skip_cluster<R: Read + Seek>(cursor: &mut ArchiveCursor<R>, info: &BlockInfo) -> Result<()> {
    let mut scratch = [0u8; SUB_BLOCK_SIZE];
    for _ in 0..info.mask.count_ones() {
        cursor.read_exact(&mut scratch)?;
    }
    Ok(())
}
