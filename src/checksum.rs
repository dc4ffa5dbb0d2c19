//! MD5 checksums embedded in the header and in every extent.
//!
//! Both regions carry their own digest inline.  The digest is computed over
//! the region with the 16-byte checksum field zeroed.

use md5::{Digest, Md5};

pub const CHECKSUM_LEN: usize = 16;

/// MD5 of `region` with `region[field_at..field_at + 16]` treated as zeros.
pub fn digest_with_zeroed_field(region: &[u8], field_at: usize) -> [u8; CHECKSUM_LEN] {
    let field_end = (field_at + CHECKSUM_LEN).min(region.len());
    let field_at  = field_at.min(region.len());
    let mut hasher = Md5::new();
    hasher.update(&region[..field_at]);
    hasher.update(&[0u8; CHECKSUM_LEN][..field_end - field_at]);
    hasher.update(&region[field_end..]);
    hasher.finalize().into()
}
