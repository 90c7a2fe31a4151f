//! In-place upgrade of legacy stores to the current format.
//!
//! The legacy store is renamed to its backup path first and then rewritten
//! record by record at the original path. Ids are positional in both formats,
//! so every parent/child/next link survives unchanged.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::{CatalogError, Result};
use crate::store::record::{decode_entry, encode_entry};
use crate::store::{read_version, FormatVersion, IndexHeader, RecordLayout, StorePaths};
use crate::types::EntryKind;

/// Legacy headers count 2048-byte sectors.
const SECTOR_SIZE: u64 = 2048;
const LEGACY_SIZE_OVERFLOW: u64 = 0xffff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaClass {
    Image,
    RawImage,
    Video,
}

/// Classifies a file name by its extension, ignoring case.
fn media_class(name: &str) -> Option<MediaClass> {
    let (_, extension) = name.rsplit_once('.')?;
    match extension.to_ascii_lowercase().as_str() {
        "bmp" | "gif" | "ico" | "jpg" | "jpeg" | "png" | "psd" | "svg" | "tif" | "tiff"
        | "xcf" => Some(MediaClass::Image),
        "nef" | "crw" | "cr2" => Some(MediaClass::RawImage),
        "mpg" | "mpeg" | "vob" | "ogg" | "mov" | "mp4" | "mkv" | "avi" | "3gp" | "wmv" => {
            Some(MediaClass::Video)
        }
        _ => None,
    }
}

/// Counters gathered while rewriting a legacy store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationStats {
    pub records: u32,
    /// Regular files.
    pub files: u32,
    /// Sum of regular file sizes.
    pub data_size: u64,
    pub images: u32,
    pub raw_images: u32,
    pub videos: u32,
    /// Legacy sizes saturated at `0xffffffff`.
    pub invalid_sizes: u32,
    pub old_size: u64,
    pub new_size: u64,
    /// Where the legacy store was kept.
    pub backup: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    Upgraded(MigrationStats),
    UpToDate,
    /// The store is newer than this tool; carries its version.
    ToolOutdated(u8),
}

/// Upgrades the store at `path` to the current format when it is older.
pub fn upgrade_store(path: &Path) -> Result<UpgradeOutcome> {
    let paths = StorePaths::new(path);
    let version = {
        let file = File::open(paths.index())?;
        read_version(&file, paths.index())?
    };

    match FormatVersion::from_u8(version) {
        Some(FormatVersion::Current) => Ok(UpgradeOutcome::UpToDate),
        Some(FormatVersion::Legacy) => rewrite_legacy(&paths).map(UpgradeOutcome::Upgraded),
        None if version > FormatVersion::Current as u8 => Ok(UpgradeOutcome::ToolOutdated(version)),
        None => Err(CatalogError::InvalidFormat(paths.index().to_path_buf())),
    }
}

fn rewrite_legacy(paths: &StorePaths) -> Result<MigrationStats> {
    let index = paths.index();
    let backup = paths.backup();
    fs::rename(index, &backup)?;
    info!("upgrading {} (backup {})", index.display(), backup.display());

    match convert(&backup, index) {
        Ok(mut stats) => {
            stats.backup = backup;
            info!(
                "upgraded {}: {} records, {} files ({} bytes), {} images, {} raw images, {} videos",
                index.display(),
                stats.records,
                stats.files,
                stats.data_size,
                stats.images,
                stats.raw_images,
                stats.videos
            );
            info!("store size {} -> {} bytes", stats.old_size, stats.new_size);
            Ok(stats)
        }
        Err(err) => {
            let _ = fs::remove_file(index);
            fs::rename(&backup, index)?;
            Err(err)
        }
    }
}

/// Reads exactly `buf.len()` bytes; `Ok(false)` on a clean or partial end of input.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(err.into()),
    }
}

fn convert(source: &Path, target: &Path) -> Result<MigrationStats> {
    let legacy = RecordLayout::LEGACY;
    let current = RecordLayout::CURRENT;
    let input = File::open(source)?;
    let old_size = input.metadata()?.len();
    let mut reader = BufReader::new(input);
    let mut writer = BufWriter::new(File::create(target)?);

    let mut header_buf = vec![0u8; legacy.header_len as usize];
    if !read_full(&mut reader, &mut header_buf)? {
        return Err(CatalogError::InvalidFormat(source.to_path_buf()));
    }
    let mut header = IndexHeader::decode(&header_buf, FormatVersion::Legacy);
    header.size = header.size.saturating_mul(SECTOR_SIZE);
    writer.write_all(&header.encode(FormatVersion::Current))?;

    let mut stats = MigrationStats {
        old_size,
        ..MigrationStats::default()
    };
    let mut record = vec![0u8; legacy.record_len as usize];
    let total = legacy.record_count(old_size);
    for id in 1..=total {
        if !read_full(&mut reader, &mut record)? {
            break;
        }
        let entry = decode_entry(id, &record, legacy)
            .ok_or_else(|| CatalogError::InvalidFormat(source.to_path_buf()))?;

        if entry.kind == EntryKind::File {
            stats.files += 1;
            stats.data_size += entry.size;
            if entry.size == LEGACY_SIZE_OVERFLOW {
                warn!("invalid size of large file {}", entry.display_name());
                stats.invalid_sizes += 1;
            }
            match media_class(&entry.display_name()) {
                Some(MediaClass::Image) => stats.images += 1,
                Some(MediaClass::RawImage) => stats.raw_images += 1,
                Some(MediaClass::Video) => stats.videos += 1,
                None => {}
            }
        }
        writer.write_all(&encode_entry(&entry, current))?;
        stats.records += 1;
    }

    let trailing = legacy.trailing_bytes(old_size);
    if trailing > 0 {
        warn!(
            "{} has {trailing} trailing bytes after the last record",
            source.display()
        );
    }

    writer.flush()?;
    stats.new_size = fs::metadata(target)?.len();
    Ok(stats)
}
