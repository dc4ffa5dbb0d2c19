pub mod error;
pub mod cursor;
pub mod blob;
pub mod checksum;
pub mod header;
pub mod extent;
pub mod cluster;
pub mod writeback;
pub mod extract;
pub mod info;

pub use error::{Result, VmaError};
pub use header::{DeviceInfo, VmaHeader};
pub use extent::{BlockInfo, Disposition, ExtentHeader, CLUSTER_SIZE, SUB_BLOCK_SIZE};
pub use cluster::{Cluster, ClusterWrite};
pub use extract::{extract, ExtractOptions, ExtractStats, Extractor};
pub use info::ArchiveInfo;
