//! Camera raw images.
//!
//! NEF and CR2 files are TIFF containers, so their EXIF block carries the
//! camera model, capture time and location along with an embedded JPEG
//! preview. The preview is what gets thumbnailed; the sensor data is never
//! decoded.

use std::path::Path;

use exif::{Exif, In, Tag};
use log::{info, warn};

use super::picture::{
    ascii_field, coordinate, parse_exif_datetime, read_exif, save_thumbnail, PictureRecord,
};
use super::MetadataExtractor;
use crate::error::Result;
use crate::store::{SideKind, SideStores};
use crate::types::Entry;

pub const PATTERN: &str = r"\.(nef|crw|cr2)$";

fn uint_field(exif: &Exif, tag: Tag, ifd: In) -> Option<u32> {
    exif.get_field(tag, ifd)?.value.get_uint(0)
}

/// Pixel size as displayed: orientations 5 to 8 are rotated by a quarter turn.
fn dimensions(exif: &Exif) -> (u32, u32) {
    let width = uint_field(exif, Tag::PixelXDimension, In::PRIMARY)
        .or_else(|| uint_field(exif, Tag::ImageWidth, In::PRIMARY))
        .unwrap_or(0);
    let height = uint_field(exif, Tag::PixelYDimension, In::PRIMARY)
        .or_else(|| uint_field(exif, Tag::ImageLength, In::PRIMARY))
        .unwrap_or(0);
    match uint_field(exif, Tag::Orientation, In::PRIMARY) {
        Some(5..=8) => (height, width),
        _ => (width, height),
    }
}

fn embedded_preview(exif: &Exif) -> Option<&[u8]> {
    let offset = uint_field(exif, Tag::JPEGInterchangeFormat, In::THUMBNAIL)? as usize;
    let len = uint_field(exif, Tag::JPEGInterchangeFormatLength, In::THUMBNAIL)? as usize;
    exif.buf().get(offset..offset.checked_add(len)?)
}

fn raw_record(id: u32, exif: &Exif) -> PictureRecord {
    let (width, height) = dimensions(exif);
    let mut record = PictureRecord {
        id,
        width: width.min(u32::from(u16::MAX)) as u16,
        height: height.min(u32::from(u16::MAX)) as u16,
        creator: ascii_field(exif, Tag::Model).unwrap_or_default(),
        author: ascii_field(exif, Tag::Artist).unwrap_or_default(),
        ctime: ascii_field(exif, Tag::DateTimeOriginal)
            .or_else(|| ascii_field(exif, Tag::DateTime))
            .and_then(|value| parse_exif_datetime(&value))
            .unwrap_or(0),
        ..PictureRecord::default()
    };
    if let (Some(lat), Some(lon)) = (
        coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef),
        coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef),
    ) {
        record.latitude = lat as f32;
        record.longitude = lon as f32;
    }
    record
}

pub struct RawImageExtractor {
    thumbnails: bool,
}

impl RawImageExtractor {
    pub fn new(thumbnails: bool) -> Self {
        Self { thumbnails }
    }

    fn write_thumbnail(&self, source: &Path, exif: &Exif, entry: &Entry, sides: &SideStores) {
        let Some(preview) = embedded_preview(exif) else {
            warn!("no embedded preview in {}", source.display());
            return;
        };
        let result = image::load_from_memory(preview)
            .and_then(|picture| save_thumbnail(&picture, entry, sides));
        match result {
            Ok(()) => info!("wrote thumbnail of {}", source.display()),
            Err(err) => warn!("cannot write thumbnail of {}: {err}", source.display()),
        }
    }
}

impl MetadataExtractor for RawImageExtractor {
    fn extract(&self, source: &Path, entry: &Entry, sides: &mut SideStores) -> Result<Option<u32>> {
        let Some(exif) = read_exif(source) else {
            warn!("cannot read raw image {}", source.display());
            return Ok(None);
        };
        let record = raw_record(entry.id, &exif);
        let offset = sides.append(SideKind::Pictures, &record.encode())?;
        if self.thumbnails {
            self.write_thumbnail(source, &exif, entry, sides);
        }
        Ok(Some(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::picture::{PictureDumper, RECORD_LEN};
    use crate::capability::{DumpContext, MetadataDumper};
    use crate::store::{SideReader, StorePaths};
    use crate::types::{EntryKind, EntryStatus};
    use exif::experimental::Writer;
    use exif::{Field, Rational, Value};
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;
    use tempfile::tempdir;

    fn ascii(tag: Tag, text: &str) -> Field {
        Field {
            tag,
            ifd_num: In::PRIMARY,
            value: Value::Ascii(vec![text.as_bytes().to_vec()]),
        }
    }

    fn degrees(tag: Tag, whole: u32, minutes: u32) -> Field {
        let parts = [whole, minutes, 0]
            .iter()
            .map(|&num| Rational { num, denom: 1 })
            .collect();
        Field {
            tag,
            ifd_num: In::PRIMARY,
            value: Value::Rational(parts),
        }
    }

    fn preview_jpeg() -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(320, 240))
            .write_to(&mut buf, ImageFormat::Jpeg)
            .expect("encode preview");
        buf.into_inner()
    }

    /// A little-endian TIFF shaped like a camera raw file.
    fn raw_fixture(preview: &[u8]) -> Vec<u8> {
        let fields = [
            ascii(Tag::Model, "NIKON D70"),
            ascii(Tag::Artist, "Jane"),
            ascii(Tag::DateTimeOriginal, "2017:03:04 10:20:30"),
            Field {
                tag: Tag::Orientation,
                ifd_num: In::PRIMARY,
                value: Value::Short(vec![6]),
            },
            Field {
                tag: Tag::PixelXDimension,
                ifd_num: In::PRIMARY,
                value: Value::Long(vec![3008]),
            },
            Field {
                tag: Tag::PixelYDimension,
                ifd_num: In::PRIMARY,
                value: Value::Long(vec![2000]),
            },
            degrees(Tag::GPSLatitude, 50, 27),
            ascii(Tag::GPSLatitudeRef, "N"),
            degrees(Tag::GPSLongitude, 30, 30),
            ascii(Tag::GPSLongitudeRef, "W"),
        ];
        let mut writer = Writer::new();
        for field in &fields {
            writer.push_field(field);
        }
        writer.set_jpeg(preview, In::THUMBNAIL);
        let mut buf = Cursor::new(Vec::new());
        writer.write(&mut buf, true).expect("write tiff");
        buf.into_inner()
    }

    fn raw_entry(id: u32) -> Entry {
        Entry::new(
            id,
            "DSC_0001.NEF",
            &EntryStatus {
                kind: EntryKind::File,
                mode: 0o100644,
                mtime: 0,
                uid: 0,
                gid: 0,
                size: 1,
            },
            0,
        )
    }

    #[test]
    fn exif_fields_fill_a_picture_record() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("DSC_0001.NEF");
        std::fs::write(&source, raw_fixture(&preview_jpeg())).expect("write raw");
        let paths = StorePaths::new(dir.path().join("disc"));
        let mut sides = SideStores::new(paths.clone());

        let offset = RawImageExtractor::new(false)
            .extract(&source, &raw_entry(7), &mut sides)
            .expect("extract")
            .expect("metadata stored");

        let reader =
            SideReader::open(&paths.side(SideKind::Pictures), SideKind::Pictures).expect("open");
        let record = PictureRecord::decode(&reader.read_at(offset, RECORD_LEN).expect("read"));
        assert_eq!(record.id, 7);
        assert_eq!((record.width, record.height), (2000, 3008));
        assert_eq!(record.creator, "NIKON D70");
        assert_eq!(record.author, "Jane");
        assert_eq!(Some(record.ctime), parse_exif_datetime("2017:03:04 10:20:30"));
        assert!((record.latitude - 50.45).abs() < 1e-4);
        assert!((record.longitude + 30.5).abs() < 1e-4);
        assert!(!paths.data_dir().join("7.jpg").exists());
    }

    #[test]
    fn embedded_preview_becomes_the_thumbnail() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("IMG_0002.CR2");
        std::fs::write(&source, raw_fixture(&preview_jpeg())).expect("write raw");
        let paths = StorePaths::new(dir.path().join("disc"));
        let mut sides = SideStores::new(paths.clone());

        let mut entry = raw_entry(3);
        entry.info = RawImageExtractor::new(true)
            .extract(&source, &entry, &mut sides)
            .expect("extract")
            .expect("metadata stored");

        let thumbnail = paths.data_dir().join("3.jpg");
        assert_eq!(image::image_dimensions(&thumbnail).expect("thumbnail"), (160, 120));

        let mut out = Vec::new();
        PictureDumper
            .dump(&DumpContext { paths: &paths, entry: &entry }, &mut out)
            .expect("dump");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("Creator:       NIKON D70\n"));
        assert!(text.contains("3.jpg"));
    }

    #[test]
    fn files_without_exif_store_nothing() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("broken.crw");
        std::fs::write(&source, b"HEAPCCDR").expect("write");
        let mut sides = SideStores::new(StorePaths::new(dir.path().join("disc")));

        let offset = RawImageExtractor::new(true)
            .extract(&source, &raw_entry(1), &mut sides)
            .expect("extract");
        assert_eq!(offset, None);
    }
}
