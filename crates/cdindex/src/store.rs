//! Index store: a fixed header followed by a flat array of fixed-size records.
//!
//! Records are never cached in memory. Every lookup seeks to the slot computed
//! from the id (see [`RecordLayout`]) and re-reads it, and every save overwrites
//! exactly one slot.

mod codec;
pub mod header;
pub mod iso;
pub mod record;
pub mod side;

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use log::debug;
use once_cell::unsync::OnceCell;

pub(crate) use codec::{FieldReader, FieldWriter};
pub use header::{FormatVersion, IndexHeader, INDEX_MARK};
pub use record::RecordLayout;
pub use side::{SideKind, SideReader, SideStores};

use crate::error::{CatalogError, Result};
use crate::types::{Entry, EntryKind};

pub const INDEX_EXTENSION: &str = ".cdi";

// ---------------------------------------------------------------------------
// Store paths
// ---------------------------------------------------------------------------

/// Index path and the paths derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    index: PathBuf,
}

impl StorePaths {
    /// Appends `.cdi` when `path` lacks it.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if has_index_extension(&path) {
            return Self { index: path };
        }
        let mut raw = path.into_os_string();
        raw.push(INDEX_EXTENSION);
        Self {
            index: PathBuf::from(raw),
        }
    }

    pub fn index(&self) -> &Path {
        &self.index
    }

    fn stem_bytes(&self) -> &[u8] {
        let raw = self.index.as_os_str().as_bytes();
        &raw[..raw.len() - INDEX_EXTENSION.len()]
    }

    /// Side file of `kind`: the index path with its extension replaced.
    pub fn side(&self, kind: SideKind) -> PathBuf {
        let mut raw = self.stem_bytes().to_vec();
        raw.push(b'.');
        raw.extend_from_slice(kind.extension().as_bytes());
        PathBuf::from(OsString::from_vec(raw))
    }

    /// Store label: the file name without `.cdi`.
    pub fn label(&self) -> String {
        let name = self
            .index
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        name[..name.len().saturating_sub(INDEX_EXTENSION.len())].to_string()
    }

    /// Directory holding per-entry files such as thumbnails.
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(OsString::from_vec(self.stem_bytes().to_vec()))
    }

    /// Backup location used while upgrading: last character replaced by `~`.
    pub fn backup(&self) -> PathBuf {
        let mut raw = self.index.as_os_str().as_bytes().to_vec();
        if let Some(last) = raw.last_mut() {
            *last = b'~';
        }
        PathBuf::from(OsString::from_vec(raw))
    }
}

/// Returns true when the file name ends in `.cdi`, ignoring case.
pub fn has_index_extension(path: &Path) -> bool {
    let raw = path.as_os_str().as_bytes();
    raw.len() > INDEX_EXTENSION.len()
        && raw[raw.len() - INDEX_EXTENSION.len()..].eq_ignore_ascii_case(INDEX_EXTENSION.as_bytes())
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Write handle used by one build. Creating it truncates the store.
pub struct IndexWriter {
    file: File,
    layout: RecordLayout,
    last_id: u32,
    sides: SideStores,
}

impl IndexWriter {
    pub fn create(paths: StorePaths, header: &IndexHeader) -> Result<Self> {
        let sides = SideStores::new(paths);
        sides.remove_stale()?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(sides.paths().index())?;
        file.write_all_at(&header.encode(FormatVersion::Current), 0)?;
        debug!("created index {}", sides.paths().index().display());
        Ok(Self {
            file,
            layout: RecordLayout::CURRENT,
            last_id: 0,
            sides,
        })
    }

    pub fn paths(&self) -> &StorePaths {
        self.sides.paths()
    }

    /// Reserves the next dense id.
    pub fn allocate_id(&mut self) -> u32 {
        self.last_id += 1;
        self.last_id
    }

    pub fn record_count(&self) -> u32 {
        self.last_id
    }

    /// Writes `entry` to its slot.
    pub fn save(&self, entry: &Entry) -> Result<()> {
        debug_assert!(entry.id != 0, "the root is never persisted");
        let buf = record::encode_entry(entry, self.layout);
        self.file.write_all_at(&buf, self.layout.offset_of(entry.id))?;
        debug!("saved record {} ({})", entry.id, entry.display_name());
        Ok(())
    }

    pub fn read_entry(&self, id: u32) -> Result<Entry> {
        read_record(&self.file, self.layout, id, self.sides.paths().index())
    }

    /// Appends a symlink target and returns its offset.
    pub fn append_symlink(&mut self, target: &[u8]) -> Result<u32> {
        self.sides.append(SideKind::Symlinks, target)
    }

    pub fn sides_mut(&mut self) -> &mut SideStores {
        &mut self.sides
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Read-only handle with a validated header.
pub struct IndexReader {
    paths: StorePaths,
    file: File,
    header: IndexHeader,
    layout: RecordLayout,
    record_count: u32,
    symlinks: OnceCell<Option<SideReader>>,
}

impl IndexReader {
    pub fn open(paths: StorePaths) -> Result<Self> {
        let file = File::open(paths.index())?;
        let version = read_version(&file, paths.index())?;
        let layout = RecordLayout::CURRENT;
        match version {
            0 => return Err(CatalogError::InvalidFormat(paths.index().to_path_buf())),
            v if v < FormatVersion::Current as u8 => {
                return Err(CatalogError::Outdated {
                    path: paths.index().to_path_buf(),
                    version: v,
                });
            }
            v if v > FormatVersion::Current as u8 => {
                return Err(CatalogError::Unsupported {
                    path: paths.index().to_path_buf(),
                    version: v,
                });
            }
            _ => {}
        }

        let mut buf = vec![0u8; layout.header_len as usize];
        file.read_exact_at(&mut buf, 0).map_err(|err| match err.kind() {
            ErrorKind::UnexpectedEof => CatalogError::InvalidFormat(paths.index().to_path_buf()),
            _ => err.into(),
        })?;
        let header = IndexHeader::decode(&buf, FormatVersion::Current);
        let record_count = layout.record_count(file.metadata()?.len());
        debug!(
            "opened index {} with {record_count} records",
            paths.index().display()
        );

        Ok(Self {
            paths,
            file,
            header,
            layout,
            record_count,
            symlinks: OnceCell::new(),
        })
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    pub fn read_entry(&self, id: u32) -> Result<Entry> {
        if id == 0 || id > self.record_count {
            return Err(CatalogError::NotFound(format!("record {id}")));
        }
        read_record(&self.file, self.layout, id, self.paths.index())
    }

    /// Reads the target of a symlink entry; `None` when it has none.
    pub fn read_symlink(&self, entry: &Entry) -> Result<Option<String>> {
        if entry.kind != EntryKind::Symlink || entry.info == 0 {
            return Ok(None);
        }
        let reader = self.symlinks.get_or_try_init(|| {
            match SideReader::open(&self.paths.side(SideKind::Symlinks), SideKind::Symlinks) {
                Ok(reader) => Ok(Some(reader)),
                Err(CatalogError::Io(err)) if err.kind() == ErrorKind::NotFound => Ok(None),
                Err(err) => Err(err),
            }
        })?;
        let Some(reader) = reader else {
            return Ok(None);
        };
        let bytes = reader.read_at(entry.info, entry.size as usize)?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Returns the first entry named `name` in the chain starting at `first`.
    pub fn find_sibling(&self, first: u32, name: &str) -> Result<Option<Entry>> {
        let mut id = first;
        let mut steps = 0;
        while id != 0 && steps <= self.record_count {
            let entry = self.read_entry(id)?;
            if entry.name == name.as_bytes() {
                return Ok(Some(entry));
            }
            id = entry.next;
            steps += 1;
        }
        Ok(None)
    }
}

/// Reads the version byte after validating the index mark.
pub fn read_version(file: &File, path: &Path) -> Result<u8> {
    let mut mark = [0u8; 4];
    match file.read_exact_at(&mut mark, 0) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
            return Err(CatalogError::InvalidFormat(path.to_path_buf()));
        }
        Err(err) => return Err(err.into()),
    }
    header::parse_mark(&mark).ok_or_else(|| CatalogError::InvalidFormat(path.to_path_buf()))
}

fn read_record(file: &File, layout: RecordLayout, id: u32, path: &Path) -> Result<Entry> {
    let mut buf = vec![0u8; layout.record_len as usize];
    file.read_exact_at(&mut buf, layout.offset_of(id))?;
    record::decode_entry(id, &buf, layout)
        .ok_or_else(|| CatalogError::InvalidFormat(path.to_path_buf()))
}
