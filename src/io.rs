//! Byte cursors for the row-oriented index format.
//!
//! All fields are little-endian and densely packed. Every read checks the
//! remaining length first and reports truncation as [`Error::Corrupted`].

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// Append-only writer over a growable buffer
#[derive(Debug, Default)]
pub struct MemoryWriter {
    buf: BytesMut,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.put_f32_le(value);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Seekable reader over a borrowed byte slice
#[derive(Debug, Clone)]
pub struct MemoryReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MemoryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn tell(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::corrupted(format!(
                "seek to {} past end of {} byte stream",
                pos,
                self.data.len()
            )));
        }
        self.pos = pos;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Fail unless at least `len` bytes remain.
    pub fn ensure(&self, len: usize) -> Result<()> {
        if self.remaining() < len {
            return Err(Error::corrupted(format!(
                "need {} bytes at offset {}, only {} remain",
                len,
                self.pos,
                self.remaining()
            )));
        }
        Ok(())
    }

    pub fn advance(&mut self, len: usize) -> Result<()> {
        self.ensure(len)?;
        self.pos += len;
        Ok(())
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.ensure(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.take().map(i64::from_le_bytes)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.take().map(u64::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.take().map(u32::from_le_bytes)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.take().map(f32::from_le_bytes)
    }
}
