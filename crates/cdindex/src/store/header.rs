//! Index header and format version marks.

use super::codec::{FieldReader, FieldWriter};

/// Three-byte mark opening every index file.
pub const INDEX_MARK: &[u8; 3] = b"CDI";

pub const VOLUME_ID_LEN: usize = 32;
pub const HEADER_TEXT_LEN: usize = 128;

/// Index format versions understood by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FormatVersion {
    /// 4-byte sizes; header size counts 2048-byte sectors.
    Legacy = 1,
    /// 8-byte sizes in bytes.
    Current = 2,
}

impl FormatVersion {
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Legacy),
            2 => Some(Self::Current),
            _ => None,
        }
    }

    /// Byte width of the `size` field in both header and records.
    #[inline]
    pub fn size_width(self) -> usize {
        match self {
            Self::Legacy => 4,
            Self::Current => 8,
        }
    }

    /// Encoded header length, mark included.
    pub fn header_len(self) -> usize {
        4 + 1 + VOLUME_ID_LEN + self.size_width() + 3 * HEADER_TEXT_LEN + 4 + 4
    }
}

/// Returns the version byte when `mark` starts with [`INDEX_MARK`].
pub fn parse_mark(mark: &[u8]) -> Option<u8> {
    match mark {
        [b'C', b'D', b'I', version, ..] => Some(*version),
        _ => None,
    }
}

/// Media description captured once per store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexHeader {
    pub bootable: bool,
    pub volume_id: String,
    /// Media size; bytes in current stores, sectors in legacy ones.
    pub size: u64,
    pub publisher: String,
    pub preparer: String,
    pub generator: String,
    pub ctime: u32,
    pub mtime: u32,
}

impl IndexHeader {
    pub fn encode(&self, version: FormatVersion) -> Vec<u8> {
        let mut writer = FieldWriter::with_capacity(version.header_len());
        writer
            .bytes(INDEX_MARK)
            .u8(version as u8)
            .u8(u8::from(self.bootable))
            .text(&self.volume_id, VOLUME_ID_LEN);
        match version {
            FormatVersion::Legacy => writer.u32(self.size.min(u64::from(u32::MAX)) as u32),
            FormatVersion::Current => writer.u64(self.size),
        };
        writer
            .text(&self.publisher, HEADER_TEXT_LEN)
            .text(&self.preparer, HEADER_TEXT_LEN)
            .text(&self.generator, HEADER_TEXT_LEN)
            .u32(self.ctime)
            .u32(self.mtime);
        writer.finish()
    }

    /// Decodes a header whose mark has already been validated.
    pub fn decode(buf: &[u8], version: FormatVersion) -> Self {
        let mut reader = FieldReader::new(buf);
        let _mark: [u8; 4] = reader.array();
        let bootable = reader.u8() != 0;
        let volume_id = reader.text(VOLUME_ID_LEN);
        let size = match version {
            FormatVersion::Legacy => u64::from(reader.u32()),
            FormatVersion::Current => reader.u64(),
        };
        Self {
            bootable,
            volume_id,
            size,
            publisher: reader.text(HEADER_TEXT_LEN),
            preparer: reader.text(HEADER_TEXT_LEN),
            generator: reader.text(HEADER_TEXT_LEN),
            ctime: reader.u32(),
            mtime: reader.u32(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IndexHeader {
        IndexHeader {
            bootable: true,
            volume_id: "BACKUP_2009".to_string(),
            size: 700 * 1024 * 1024,
            publisher: "ACME".to_string(),
            preparer: String::new(),
            generator: "MKISOFS".to_string(),
            ctime: 1_234_567_890,
            mtime: 1_234_567_891,
        }
    }

    #[test]
    fn header_lengths_match_layouts() {
        assert_eq!(FormatVersion::Current.header_len(), 437);
        assert_eq!(FormatVersion::Legacy.header_len(), 433);
        assert_eq!(sample().encode(FormatVersion::Current).len(), 437);
        assert_eq!(sample().encode(FormatVersion::Legacy).len(), 433);
    }

    #[test]
    fn encoded_header_starts_with_mark() {
        let buf = sample().encode(FormatVersion::Current);
        assert_eq!(&buf[..4], b"CDI\x02");
        assert_eq!(parse_mark(&buf), Some(2));
        assert_eq!(parse_mark(b"XYZ\x02"), None);
        assert_eq!(parse_mark(b"CD"), None);
    }

    #[test]
    fn current_header_decodes_its_encoding() {
        let header = sample();
        let decoded = IndexHeader::decode(&header.encode(FormatVersion::Current), FormatVersion::Current);
        assert_eq!(decoded, header);
    }

    #[test]
    fn legacy_size_field_is_four_bytes() {
        let mut header = sample();
        header.size = 1000;
        let buf = header.encode(FormatVersion::Legacy);
        assert_eq!(&buf[37..41], &1000u32.to_le_bytes());
        assert_eq!(IndexHeader::decode(&buf, FormatVersion::Legacy).size, 1000);
    }
}
