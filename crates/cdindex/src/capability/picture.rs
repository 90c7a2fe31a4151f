//! Picture dimensions, EXIF fields and thumbnails.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use chrono::{Local, NaiveDateTime, TimeZone};
use exif::{Exif, In, Tag, Value};
use image::{DynamicImage, ImageFormat};
use log::{debug, warn};

use super::{
    asctime, report_trailer, write_field, write_thumbnails, DumpContext, MetadataDumper,
    MetadataExtractor,
};
use crate::error::Result;
use crate::store::{FieldReader, FieldWriter, SideKind, SideReader, SideStores};
use crate::types::{clamp_time, Entry};

pub const PATTERN: &str = r"\.(bmp|gif|ico|jpe?g|png|psd|svg|tiff?|xcf)$";
pub const DUMP_PATTERN: &str = r"\.(bmp|gif|ico|jpe?g|png|psd|svg|tiff?|xcf|nef|crw|cr2)$";

pub const RECORD_LEN: usize = 148;
const NAME_LEN: usize = 64;
pub const THUMBNAIL_SIZE: u32 = 160;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PictureRecord {
    pub id: u32,
    pub width: u16,
    pub height: u16,
    /// Producing software or camera model.
    pub creator: String,
    pub author: String,
    pub ctime: u32,
    pub latitude: f32,
    pub longitude: f32,
}

impl PictureRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = FieldWriter::with_capacity(RECORD_LEN);
        writer
            .u32(self.id)
            .u16(self.width)
            .u16(self.height)
            .text(&self.creator, NAME_LEN)
            .text(&self.author, NAME_LEN)
            .u32(self.ctime)
            .f32(self.latitude)
            .f32(self.longitude);
        writer.finish()
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut reader = FieldReader::new(buf);
        Self {
            id: reader.u32(),
            width: reader.u16(),
            height: reader.u16(),
            creator: reader.text(NAME_LEN),
            author: reader.text(NAME_LEN),
            ctime: reader.u32(),
            latitude: reader.f32(),
            longitude: reader.f32(),
        }
    }

    pub fn has_location(&self) -> bool {
        self.latitude != 0.0 || self.longitude != 0.0
    }
}

// ---------------------------------------------------------------------------
// EXIF
// ---------------------------------------------------------------------------

pub(super) fn read_exif(path: &Path) -> Option<Exif> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => Some(exif),
        Err(err) => {
            debug!("no EXIF data in {}: {err}", path.display());
            None
        }
    }
}

pub(super) fn ascii_field(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(parts) => {
            let text = parts
                .first()
                .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())?;
            (!text.is_empty()).then_some(text)
        }
        _ => Some(field.display_value().to_string().replace('"', "")),
    }
}

/// Parses an EXIF `YYYY:MM:DD HH:MM:SS` value as local time.
pub fn parse_exif_datetime(value: &str) -> Option<u32> {
    let naive = NaiveDateTime::parse_from_str(value.trim(), "%Y:%m:%d %H:%M:%S").ok()?;
    Local
        .from_local_datetime(&naive)
        .single()
        .map(|dt| clamp_time(dt.timestamp()))
}

/// Converts degrees, minutes, seconds to signed decimal degrees.
pub fn dms_to_degrees(dms: [f64; 3], reference: &str) -> f64 {
    let degrees = dms[0] + dms[1] / 60.0 + dms[2] / 3600.0;
    match reference.trim() {
        "S" | "W" => -degrees,
        _ => degrees,
    }
}

pub(super) fn coordinate(exif: &Exif, tag: Tag, reference: Tag) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let Value::Rational(parts) = &field.value else {
        return None;
    };
    if parts.len() < 3 {
        return None;
    }
    let dms = [parts[0].to_f64(), parts[1].to_f64(), parts[2].to_f64()];
    let reference = ascii_field(exif, reference).unwrap_or_default();
    Some(dms_to_degrees(dms, &reference))
}

fn apply_exif(record: &mut PictureRecord, exif: &Exif) {
    record.creator = ascii_field(exif, Tag::Software)
        .or_else(|| ascii_field(exif, Tag::Model))
        .unwrap_or_default();
    record.author = ascii_field(exif, Tag::Artist).unwrap_or_default();
    record.ctime = ascii_field(exif, Tag::DateTimeOriginal)
        .or_else(|| ascii_field(exif, Tag::DateTime))
        .and_then(|value| parse_exif_datetime(&value))
        .unwrap_or(0);
    if let (Some(lat), Some(lon)) = (
        coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef),
        coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef),
    ) {
        record.latitude = lat as f32;
        record.longitude = lon as f32;
    }
}

/// Writes a JPEG of at most [`THUMBNAIL_SIZE`] px square to `<data dir>/<id>.jpg`.
pub(super) fn save_thumbnail(
    picture: &DynamicImage,
    entry: &Entry,
    sides: &SideStores,
) -> image::ImageResult<()> {
    let dir = sides.paths().data_dir();
    std::fs::create_dir_all(&dir).map_err(image::ImageError::IoError)?;
    picture
        .thumbnail(THUMBNAIL_SIZE, THUMBNAIL_SIZE)
        .to_rgb8()
        .save_with_format(dir.join(format!("{}.jpg", entry.id)), ImageFormat::Jpeg)
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

pub struct PictureExtractor {
    thumbnails: bool,
}

impl PictureExtractor {
    pub fn new(thumbnails: bool) -> Self {
        Self { thumbnails }
    }

    fn write_thumbnail(&self, source: &Path, entry: &Entry, sides: &SideStores) {
        let result = image::open(source).and_then(|picture| save_thumbnail(&picture, entry, sides));
        if let Err(err) = result {
            warn!("cannot write thumbnail of {}: {err}", source.display());
        }
    }
}

impl MetadataExtractor for PictureExtractor {
    fn extract(&self, source: &Path, entry: &Entry, sides: &mut SideStores) -> Result<Option<u32>> {
        let mut record = PictureRecord {
            id: entry.id,
            ..PictureRecord::default()
        };
        let dimensions = image::image_dimensions(source);
        if let Ok((width, height)) = dimensions {
            record.width = width.min(u32::from(u16::MAX)) as u16;
            record.height = height.min(u32::from(u16::MAX)) as u16;
        }
        let exif = read_exif(source);
        if let Some(exif) = &exif {
            apply_exif(&mut record, exif);
        }
        if dimensions.is_err() && exif.is_none() {
            debug!("no picture metadata in {}", source.display());
            return Ok(None);
        }

        let offset = sides.append(SideKind::Pictures, &record.encode())?;
        if self.thumbnails && dimensions.is_ok() {
            self.write_thumbnail(source, entry, sides);
        }
        Ok(Some(offset))
    }
}

pub struct PictureDumper;

impl MetadataDumper for PictureDumper {
    fn dump(&self, ctx: &DumpContext<'_>, out: &mut dyn Write) -> Result<()> {
        let reader = SideReader::open(&ctx.paths.side(SideKind::Pictures), SideKind::Pictures)?;
        let record = PictureRecord::decode(&reader.read_at(ctx.entry.info, RECORD_LEN)?);

        let location = if record.has_location() {
            format!("{:.6} {:.6}", record.latitude, record.longitude)
        } else {
            String::new()
        };

        write_field(out, "File", &ctx.entry.display_name())?;
        write_field(out, "Dimensions", &format!("{}x{}", record.width, record.height))?;
        write_field(out, "Created", &asctime(record.ctime))?;
        writeln!(out)?;
        write_field(out, "Creator", &record.creator)?;
        write_field(out, "Author", &record.author)?;
        write_field(out, "Location", &location)?;
        write_thumbnails(out, ctx.paths, ctx.entry.id)?;
        report_trailer(out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StorePaths;
    use crate::types::{EntryKind, EntryStatus};
    use tempfile::tempdir;

    fn picture_entry(id: u32) -> Entry {
        Entry::new(
            id,
            "photo.png",
            &EntryStatus {
                kind: EntryKind::File,
                mode: 0o100644,
                mtime: 0,
                uid: 0,
                gid: 0,
                size: 100,
            },
            0,
        )
    }

    #[test]
    fn record_layout_is_fixed() {
        let record = PictureRecord {
            id: 3,
            width: 640,
            height: 480,
            creator: "GIMP".to_string(),
            author: "Jane".to_string(),
            ctime: 1000,
            latitude: 50.45,
            longitude: -30.5,
        };
        let buf = record.encode();
        assert_eq!(buf.len(), RECORD_LEN);
        assert_eq!(PictureRecord::decode(&buf), record);
    }

    #[test]
    fn gps_references_set_sign() {
        assert!((dms_to_degrees([50.0, 27.0, 0.0], "N") - 50.45).abs() < 1e-9);
        assert!((dms_to_degrees([30.0, 30.0, 0.0], "W") + 30.5).abs() < 1e-9);
    }

    #[test]
    fn exif_datetime_parses_as_local_time() {
        let secs = parse_exif_datetime("2008:07:31 10:38:11").expect("valid date");
        assert!(secs > 1_217_000_000);
        assert_eq!(parse_exif_datetime("not a date"), None);
    }

    #[test]
    fn png_dimensions_and_thumbnail_are_stored() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("photo.png");
        image::RgbImage::new(320, 200).save(&source).expect("write png");
        let paths = StorePaths::new(dir.path().join("disc"));
        let mut sides = SideStores::new(paths.clone());

        let offset = PictureExtractor::new(true)
            .extract(&source, &picture_entry(4), &mut sides)
            .expect("extract")
            .expect("metadata stored");

        let reader = SideReader::open(&paths.side(SideKind::Pictures), SideKind::Pictures).expect("open");
        let record = PictureRecord::decode(&reader.read_at(offset, RECORD_LEN).expect("read"));
        assert_eq!((record.width, record.height), (320, 200));
        let thumbnail = paths.data_dir().join("4.jpg");
        assert_eq!(image::image_dimensions(&thumbnail).expect("thumbnail"), (160, 100));
    }

    #[test]
    fn unreadable_picture_stores_nothing() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("fake.png");
        std::fs::write(&source, b"not an image").expect("write");
        let mut sides = SideStores::new(StorePaths::new(dir.path().join("disc")));

        let offset = PictureExtractor::new(false)
            .extract(&source, &picture_entry(1), &mut sides)
            .expect("extract");
        assert_eq!(offset, None);
    }

    #[test]
    fn report_lists_dimensions_and_blanks() {
        let dir = tempdir().expect("tempdir");
        let paths = StorePaths::new(dir.path().join("disc"));
        let mut sides = SideStores::new(paths.clone());
        let record = PictureRecord {
            id: 2,
            width: 800,
            height: 600,
            creator: "Camera".to_string(),
            ..PictureRecord::default()
        };
        let mut entry = picture_entry(2);
        entry.info = sides.append(SideKind::Pictures, &record.encode()).expect("append");

        let mut out = Vec::new();
        PictureDumper
            .dump(&DumpContext { paths: &paths, entry: &entry }, &mut out)
            .expect("dump");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("Dimensions:    800x600\n"));
        assert!(text.contains("Created:       -\n"));
        assert!(text.contains("Creator:       Camera\n"));
        assert!(text.contains("Location:      -\n"));
        assert!(text.ends_with("\n---\n\n"));
    }
}
