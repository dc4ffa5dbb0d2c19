//! Positional byte source over the archive.
//!
//! Every parser in the crate reads through [`ArchiveCursor`].  It tracks the
//! absolute offset itself so error messages can say exactly where a read
//! failed, and it turns a short read into [`VmaError::TruncatedArchive`]
//! instead of a bare `UnexpectedEof`.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::io::{self, Read, Seek, SeekFrom};

use crate::error::{Result, VmaError};

pub struct ArchiveCursor<R: Read + Seek> {
    inner: R,
    pos:   u64,
}

impl<R: Read + Seek> ArchiveCursor<R> {
    /// Wrap `inner`, picking up its current stream position.
    pub fn new(mut inner: R) -> Result<Self> {
        let pos = inner.stream_position()?;
        Ok(Self { inner, pos })
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Total length of the underlying stream.  The position is preserved.
    pub fn stream_len(&mut self) -> Result<u64> {
        let end = self.inner.seek(SeekFrom::End(0))?;
        self.inner.seek(SeekFrom::Start(self.pos))?;
        Ok(end)
    }

    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.pos = self.inner.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    pub fn skip(&mut self, n: u64) -> Result<()> {
        self.seek_to(self.pos + n)
    }

    /// Fill `buf` completely or fail with `TruncatedArchive`.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let start = self.pos;
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.pos += filled as u64;
        if filled < buf.len() {
            return Err(VmaError::TruncatedArchive {
                offset:   start,
                expected: buf.len(),
                actual:   filled,
            });
        }
        Ok(())
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        Ok(BigEndian::read_u16(&self.read_array::<2>()?))
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(&self.read_array::<2>()?))
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(&self.read_array::<4>()?))
    }

    pub fn read_u64_be(&mut self) -> Result<u64> {
        Ok(BigEndian::read_u64(&self.read_array::<8>()?))
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
