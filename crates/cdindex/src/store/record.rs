//! Fixed-size entry records and their addressing.

use super::codec::{FieldReader, FieldWriter};
use super::header::FormatVersion;
use crate::types::{Entry, EntryKind, NAME_MAX};

/// Header and record sizes of one format version.
///
/// Records form a dense array after the header; record `id` lives at
/// `header_len + (id - 1) * record_len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    pub version: FormatVersion,
    pub header_len: u64,
    pub record_len: u64,
}

impl RecordLayout {
    pub const LEGACY: Self = Self::new(FormatVersion::Legacy);
    pub const CURRENT: Self = Self::new(FormatVersion::Current);

    const fn new(version: FormatVersion) -> Self {
        let size_width = match version {
            FormatVersion::Legacy => 4,
            FormatVersion::Current => 8,
        };
        Self {
            version,
            header_len: (4 + 1 + 32 + size_width + 3 * 128 + 4 + 4) as u64,
            record_len: (1 + NAME_MAX + 2 + 4 + 2 + 2 + size_width + 4 * 4) as u64,
        }
    }

    /// Byte offset of record `id`; `id` must be at least 1.
    #[inline]
    pub fn offset_of(&self, id: u32) -> u64 {
        self.header_len + u64::from(id.saturating_sub(1)) * self.record_len
    }

    /// Whole records held by a file of `file_len` bytes.
    pub fn record_count(&self, file_len: u64) -> u32 {
        (file_len.saturating_sub(self.header_len) / self.record_len) as u32
    }

    /// Bytes after the last whole record.
    pub fn trailing_bytes(&self, file_len: u64) -> u64 {
        file_len.saturating_sub(self.header_len) % self.record_len
    }
}

pub fn encode_entry(entry: &Entry, layout: RecordLayout) -> Vec<u8> {
    let mut writer = FieldWriter::with_capacity(layout.record_len as usize);
    writer
        .u8(entry.kind as u8)
        .padded(&entry.name, NAME_MAX)
        .u16(entry.mode)
        .u32(entry.mtime)
        .u16(entry.uid)
        .u16(entry.gid);
    match layout.version {
        FormatVersion::Legacy => writer.u32(entry.size.min(u64::from(u32::MAX)) as u32),
        FormatVersion::Current => writer.u64(entry.size),
    };
    writer
        .u32(entry.info)
        .u32(entry.parent)
        .u32(entry.child)
        .u32(entry.next);
    writer.finish()
}

/// Decodes record `id`; returns `None` for an unknown type byte.
pub fn decode_entry(id: u32, buf: &[u8], layout: RecordLayout) -> Option<Entry> {
    let mut reader = FieldReader::new(buf);
    let kind = EntryKind::from_u8(reader.u8())?;
    let name = reader.padded(NAME_MAX);
    let mode = reader.u16();
    let mtime = reader.u32();
    let uid = reader.u16();
    let gid = reader.u16();
    let size = match layout.version {
        FormatVersion::Legacy => u64::from(reader.u32()),
        FormatVersion::Current => reader.u64(),
    };
    Some(Entry {
        id,
        kind,
        name,
        mode,
        mtime,
        uid,
        gid,
        size,
        info: reader.u32(),
        parent: reader.u32(),
        child: reader.u32(),
        next: reader.u32(),
    })
}
