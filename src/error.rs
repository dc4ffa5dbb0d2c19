//! Error taxonomy for archive decoding and extraction.
//!
//! Every variant is fatal.  Nothing in the decoder retries or recovers
//! locally; the extraction loop stops submitting work, drains the writer
//! pool and hands the first error back to the caller.

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, VmaError>;

#[derive(Error, Debug)]
pub enum VmaError {
    /// Bad magic, unsupported version or malformed region bounds.
    #[error("Format error at offset {offset}: {reason}")]
    Format { offset: u64, reason: String },

    #[error("{region} checksum mismatch at offset {offset}: declared {declared}, computed {computed}")]
    Integrity {
        region:   &'static str,
        offset:   u64,
        declared: String,
        computed: String,
    },

    #[error("Blob offset {blob_offset} referenced by {referrer} is not in the blob table")]
    Reference { blob_offset: u32, referrer: String },

    #[error("Archive truncated at offset {offset}: expected {expected} bytes, got {actual}")]
    TruncatedArchive { offset: u64, expected: usize, actual: usize },

    #[error("Extent at offset {offset} belongs to archive {found}, expected {expected}")]
    IdentityMismatch { offset: u64, expected: Uuid, found: Uuid },

    #[error("Block-info in extent at offset {offset} targets device {device_id}, which is not present")]
    UnknownDevice { offset: u64, device_id: u8 },

    #[error("Block-info in extent at offset {offset} places cluster {cluster} past the end of device {device_id} ({device_size} bytes)")]
    ClusterOutOfRange { offset: u64, device_id: u8, cluster: u32, device_size: u64 },

    #[error("Destination `{}` already exists (use --force to overwrite)", .0.display())]
    DestinationExists(PathBuf),

    #[error("I/O error on `{}`: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl VmaError {
    pub(crate) fn format(offset: u64, reason: impl Into<String>) -> Self {
        VmaError::Format { offset, reason: reason.into() }
    }

    pub(crate) fn output(path: impl Into<PathBuf>, source: io::Error) -> Self {
        VmaError::Output { path: path.into(), source }
    }
}
