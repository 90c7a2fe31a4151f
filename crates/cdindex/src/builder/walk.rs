//! Directory walking.

use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use log::{debug, info, warn};

use super::Builder;
use crate::error::Result;
use crate::types::{Entry, EntryKind, EntryStatus};

/// Child names of `dir`, sorted.
fn sorted_names(dir: &Path) -> std::io::Result<Vec<OsString>> {
    let mut names = fs::read_dir(dir)?
        .map(|entry| entry.map(|entry| entry.file_name()))
        .collect::<std::io::Result<Vec<_>>>()?;
    names.sort_unstable();
    Ok(names)
}

impl Builder<'_> {
    /// Indexes the children of `dir` below `parent`.
    ///
    /// `parent.child` is updated in memory; the caller saves `parent`.
    pub(crate) fn walk_dir(&mut self, dir: &Path, parent: &mut Entry) -> Result<()> {
        let names = match sorted_names(dir) {
            Ok(names) => names,
            Err(err) if !parent.is_root() => {
                warn!("cannot read directory {}: {err}", dir.display());
                self.report.stat_failures += 1;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        info!("indexing directory {}", dir.display());

        let mut prev: Option<Entry> = None;
        for name in names {
            let path = dir.join(&name);
            let metadata = match fs::symlink_metadata(&path) {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!("cannot stat {}: {err}", path.display());
                    self.report.stat_failures += 1;
                    continue;
                }
            };
            let Some(status) = EntryStatus::from_metadata(&metadata) else {
                debug!("skipping special file {}", path.display());
                self.report.skipped += 1;
                continue;
            };

            let id = self.writer.allocate_id();
            let mut entry = Entry::new(id, name.as_bytes(), &status, parent.id);
            parent.adopt_first_child(id);

            match status.kind {
                EntryKind::Dir => {
                    self.report.dirs += 1;
                    self.walk_dir(&path, &mut entry)?;
                }
                EntryKind::Symlink => {
                    self.report.symlinks += 1;
                    self.store_link_target(&path, &mut entry)?;
                }
                EntryKind::File | EntryKind::Archive => {
                    self.report.files += 1;
                    self.extract_metadata(&path, &mut entry)?;
                    self.ingest_container(&path, &mut entry)?;
                }
            }
            self.writer.save(&entry)?;

            if let Some(mut previous) = prev.take() {
                previous.next = id;
                self.writer.save(&previous)?;
            }
            prev = Some(entry);
        }
        Ok(())
    }

    fn store_link_target(&mut self, path: &Path, entry: &mut Entry) -> Result<()> {
        match fs::read_link(path) {
            Ok(target) => {
                let bytes = target.as_os_str().as_bytes();
                entry.info = self.writer.append_symlink(bytes)?;
                entry.size = bytes.len() as u64;
            }
            Err(err) => {
                warn!("cannot read link {}: {err}", path.display());
                entry.size = 0;
            }
        }
        Ok(())
    }

    fn extract_metadata(&mut self, path: &Path, entry: &mut Entry) -> Result<()> {
        let registry = self.registry;
        let Some(extractor) = registry.find_extractor(&entry.display_name()) else {
            return Ok(());
        };
        info!("reading {} metadata of {}", extractor.name, path.display());
        match extractor
            .handler
            .extract(path, entry, self.writer.sides_mut())
        {
            Ok(offset) => entry.info = offset.unwrap_or(0),
            Err(err) => {
                warn!("{} extractor failed on {}: {err}", extractor.name, path.display());
                entry.info = 0;
            }
        }
        Ok(())
    }
}
