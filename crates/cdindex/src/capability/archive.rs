//! Tar listing, plain or gzip/xz compressed.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use log::debug;
use xz2::read::XzDecoder;

use super::{ContainerPlugin, ListedEntry, Listing};
use crate::error::{CatalogError, Result};
use crate::types::{clamp_time, EntryKind, EntryStatus};

pub const PATTERN: &str = r"\.(tar(\.(gz|xz))?|tgz|txz)$";

const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;
const S_IFLNK: u32 = 0o120000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    None,
    Gzip,
    Xz,
}

impl Compression {
    fn for_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name.ends_with(".gz") || name.ends_with(".tgz") {
            Self::Gzip
        } else if name.ends_with(".xz") || name.ends_with(".txz") {
            Self::Xz
        } else {
            Self::None
        }
    }
}

pub struct TarPlugin;

impl ContainerPlugin for TarPlugin {
    fn open(&self, path: &Path) -> Result<Listing> {
        let file = BufReader::new(File::open(path)?);
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let reader: Box<dyn Read> = match Compression::for_name(&name) {
            Compression::Gzip => Box::new(GzDecoder::new(file)),
            Compression::Xz => Box::new(XzDecoder::new(file)),
            Compression::None => Box::new(file),
        };

        let listed = list_tar(reader).map_err(|err| {
            CatalogError::Plugin(format!("cannot list {}: {err}", path.display()))
        })?;
        Ok(Box::new(listed.into_iter().map(Ok)))
    }
}

fn list_tar<R: Read>(reader: R) -> std::io::Result<Vec<ListedEntry>> {
    let mut archive = tar::Archive::new(reader);
    let mut listed = Vec::new();

    for entry in archive.entries()? {
        let entry = entry?;
        let header = entry.header();
        let entry_type = header.entry_type();
        let (kind, type_bits) = if entry_type.is_dir() {
            (EntryKind::Dir, S_IFDIR)
        } else if entry_type.is_symlink() {
            (EntryKind::Symlink, S_IFLNK)
        } else if entry_type.is_file() || entry_type.is_hard_link() {
            (EntryKind::File, S_IFREG)
        } else {
            debug!("skipping tar member of type {:?}", entry_type);
            continue;
        };

        let path = entry.path()?.to_string_lossy().into_owned();
        let link_target = match kind {
            EntryKind::Symlink => entry
                .link_name()?
                .map(|target| target.to_string_lossy().into_owned()),
            _ => None,
        };
        let status = EntryStatus {
            kind,
            mode: ((header.mode()? & 0o7777) | type_bits) as u16,
            mtime: clamp_time(header.mtime()? as i64),
            uid: header.uid()? as u16,
            gid: header.gid()? as u16,
            size: if kind == EntryKind::File { entry.size() } else { 0 },
        };
        listed.push(ListedEntry {
            path,
            link_target,
            status,
        });
    }
    Ok(listed)
}
