//! Append-only side files referenced from entry `info` offsets.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::Path;

use log::debug;

use super::StorePaths;
use crate::error::{CatalogError, Result};

/// Version byte written after every side-store mark.
pub const SIDE_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SideKind {
    /// Raw symlink targets.
    Symlinks,
    /// Audio metadata records.
    Audio,
    /// Picture metadata records.
    Pictures,
    /// Video metadata records.
    Videos,
    /// Audio stream records referenced from video records.
    Streams,
}

impl SideKind {
    pub const ALL: [SideKind; 5] = [
        Self::Symlinks,
        Self::Audio,
        Self::Pictures,
        Self::Videos,
        Self::Streams,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            Self::Symlinks => "cdl",
            Self::Audio => "cda",
            Self::Pictures => "cdp",
            Self::Videos => "cdv",
            Self::Streams => "cdva",
        }
    }

    pub fn mark(self) -> &'static [u8] {
        match self {
            Self::Symlinks => b"CDL",
            Self::Audio => b"CDA",
            Self::Pictures => b"CDP",
            Self::Videos => b"CDV",
            Self::Streams => b"CDVA",
        }
    }

    /// Mark plus version byte.
    pub fn preamble(self) -> Vec<u8> {
        let mut bytes = self.mark().to_vec();
        bytes.push(SIDE_VERSION);
        bytes
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Side files of one store being built, opened on first append.
pub struct SideStores {
    paths: StorePaths,
    open: HashMap<SideKind, File>,
}

impl SideStores {
    pub fn new(paths: StorePaths) -> Self {
        Self {
            paths,
            open: HashMap::new(),
        }
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Deletes side files left by an earlier build of the same store.
    pub fn remove_stale(&self) -> Result<()> {
        for kind in SideKind::ALL {
            let path = self.paths.side(kind);
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("removed stale side store {}", path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Appends `bytes` and returns the offset they start at.
    pub fn append(&mut self, kind: SideKind, bytes: &[u8]) -> Result<u32> {
        let file = match self.open.entry(kind) {
            std::collections::hash_map::Entry::Occupied(slot) => slot.into_mut(),
            std::collections::hash_map::Entry::Vacant(slot) => {
                let path = self.paths.side(kind);
                debug!("creating side store {}", path.display());
                let mut file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)?;
                file.write_all(&kind.preamble())?;
                slot.insert(file)
            }
        };

        let offset = file.seek(SeekFrom::End(0))?;
        let offset = u32::try_from(offset).map_err(|_| {
            CatalogError::Io(std::io::Error::new(
                ErrorKind::Other,
                format!("side store {} exceeds 4 GiB", kind.extension()),
            ))
        })?;
        file.write_all(bytes)?;
        Ok(offset)
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Read handle on one side file with a validated mark.
pub struct SideReader {
    file: File,
}

impl SideReader {
    pub fn open(path: &Path, kind: SideKind) -> Result<Self> {
        let file = File::open(path)?;
        let expected = kind.preamble();
        let mut found = vec![0u8; expected.len()];
        match file.read_exact_at(&mut found, 0) {
            Ok(()) if found == expected => {}
            Ok(()) => return Err(CatalogError::InvalidFormat(path.to_path_buf())),
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                return Err(CatalogError::InvalidFormat(path.to_path_buf()));
            }
            Err(err) => return Err(err.into()),
        }
        Ok(Self { file })
    }

    /// Reads `len` bytes starting at `offset`.
    pub fn read_at(&self, offset: u32, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.file.read_exact_at(&mut buf, u64::from(offset))?;
        Ok(buf)
    }
}
