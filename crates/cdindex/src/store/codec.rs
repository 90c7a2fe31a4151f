//! Little-endian fixed-width field encoding shared by the index and side stores.

use memchr::memchr;

use crate::types::truncate_utf8;

/// Appends fields to a record buffer.
pub(crate) struct FieldWriter {
    buf: Vec<u8>,
}

impl FieldWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn f32(&mut self, value: f32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(value);
        self
    }

    /// Writes `value` NUL-padded to exactly `width` bytes.
    pub fn text(&mut self, value: &str, width: usize) -> &mut Self {
        self.padded(truncate_utf8(value, width).as_bytes(), width)
    }

    /// Writes raw bytes cut or NUL-padded to exactly `width` bytes.
    pub fn padded(&mut self, value: &[u8], width: usize) -> &mut Self {
        let value = &value[..value.len().min(width)];
        self.buf.extend_from_slice(value);
        self.buf.resize(self.buf.len() + width - value.len(), 0);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads fields from a record buffer. Reads past the end yield zeros.
pub(crate) struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        if let Some(slice) = self.buf.get(self.pos..self.pos + N) {
            out.copy_from_slice(slice);
        }
        self.pos += N;
        out
    }

    fn slice(&mut self, width: usize) -> &'a [u8] {
        let start = self.pos.min(self.buf.len());
        let end = (self.pos + width).min(self.buf.len());
        self.pos += width;
        &self.buf[start..end]
    }

    pub fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    pub fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    pub fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    pub fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    pub fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }

    pub fn array<const N: usize>(&mut self) -> [u8; N] {
        self.take()
    }

    /// Reads a NUL-padded string field of `width` bytes.
    pub fn text(&mut self, width: usize) -> String {
        String::from_utf8_lossy(&self.padded(width)).into_owned()
    }

    /// Reads the bytes of a NUL-padded field of `width` bytes as stored.
    pub fn padded(&mut self, width: usize) -> Vec<u8> {
        let raw = self.slice(width);
        let end = memchr(0, raw).unwrap_or(raw.len());
        raw[..end].to_vec()
    }
}
