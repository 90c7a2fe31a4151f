//! Container ingestion: splicing plugin listings below an archive entry.
//!
//! Listed items may arrive in any order. Each one is resolved below the
//! container entry by name, linked as the first child of its parent or
//! appended to the tail of the parent's sibling chain.

use std::path::Path;

use log::{debug, error, info, warn};

use super::Builder;
use crate::capability::ListedEntry;
use crate::error::{CatalogError, Result};
use crate::types::{Entry, EntryKind, EntryStatus, NO_ENTRY};

/// Splits a listed path into its components.
///
/// `.` and empty components are dropped, so `./a//b/` yields `["a", "b"]`.
pub fn normalize_path(path: &str) -> Result<Vec<&str>> {
    if path.starts_with('/') {
        return Err(CatalogError::Plugin(format!("absolute path {path} in listing")));
    }
    Ok(path
        .split('/')
        .filter(|component| !component.is_empty() && *component != ".")
        .collect())
}

impl Builder<'_> {
    /// Lists `path` with the first matching plugin and indexes its members below `upper`.
    ///
    /// `upper` is retyped to an archive root once the listing has been consumed.
    pub(crate) fn ingest_container(&mut self, path: &Path, upper: &mut Entry) -> Result<()> {
        let registry = self.registry;
        let Some(plugin) = registry.find_plugin(&upper.display_name()) else {
            return Ok(());
        };

        let listing = match plugin.handler.open(path) {
            Ok(listing) => listing,
            Err(err) if plugin.handler.best_effort() => {
                debug!("{} did not list {}: {err}", plugin.name, path.display());
                return Ok(());
            }
            Err(err) => {
                error!("cannot open {} with {}: {err}", path.display(), plugin.name);
                return Ok(());
            }
        };
        info!("indexing container {} with {}", path.display(), plugin.name);

        let mut errors = 0u32;
        for item in listing {
            let listed = match item {
                Ok(listed) => listed,
                Err(err) => {
                    warn!("{} listing of {} failed: {err}", plugin.name, path.display());
                    errors += 1;
                    continue;
                }
            };
            match self.ingest_item(upper, &listed) {
                Ok(()) => {}
                Err(err) if err.is_local() => {
                    error!("parent not found for {}: {err}", listed.path);
                    self.report.unresolved += 1;
                    errors += 1;
                }
                Err(err) => return Err(err),
            }
        }

        if errors > 0 {
            warn!("{} indexed with errors", path.display());
            self.report.partial += 1;
        }
        upper.kind = EntryKind::Archive;
        self.report.containers += 1;
        Ok(())
    }

    fn ingest_item(&mut self, upper: &mut Entry, listed: &ListedEntry) -> Result<()> {
        let components = normalize_path(&listed.path)?;
        let Some((name, dirs)) = components.split_last() else {
            return Ok(());
        };
        let parent_id = self.resolve_parent(upper, dirs)?;

        let first = self.first_child_of(upper, parent_id)?;
        if let Some(mut existing) = self.find_sibling(first, name)? {
            if existing.kind == EntryKind::Dir && listed.status.kind == EntryKind::Dir {
                existing.update_status(&listed.status);
                return self.writer.save(&existing);
            }
        }

        let id = self.writer.allocate_id();
        let mut entry = Entry::new(id, name, &listed.status, parent_id);
        match listed.status.kind {
            EntryKind::Dir => self.report.dirs += 1,
            EntryKind::Symlink => {
                self.report.symlinks += 1;
                if let Some(target) = &listed.link_target {
                    entry.info = self.writer.append_symlink(target.as_bytes())?;
                    entry.size = target.len() as u64;
                }
            }
            EntryKind::File | EntryKind::Archive => self.report.files += 1,
        }
        self.writer.save(&entry)?;
        self.link_child(upper, parent_id, id)
    }

    /// Resolves the directory components of a listed path to a parent id.
    ///
    /// Only the last component may be missing; it is created as a placeholder.
    fn resolve_parent(&mut self, upper: &mut Entry, dirs: &[&str]) -> Result<u32> {
        let mut parent_id = upper.id;
        for (index, dir) in dirs.iter().enumerate() {
            let first = self.first_child_of(upper, parent_id)?;
            parent_id = match self.find_sibling(first, dir)? {
                Some(found) if found.kind == EntryKind::Dir => found.id,
                Some(found) => {
                    return Err(CatalogError::TypeMismatch(format!(
                        "{} is not a directory",
                        found.display_name()
                    )));
                }
                None if index + 1 == dirs.len() => self.create_placeholder(upper, parent_id, dir)?,
                None => {
                    return Err(CatalogError::Plugin(format!(
                        "cannot create {}: autocreate of multiple dirs is not supported",
                        dirs[index..].join("/")
                    )));
                }
            };
        }
        Ok(parent_id)
    }

    fn create_placeholder(&mut self, upper: &mut Entry, parent_id: u32, name: &str) -> Result<u32> {
        let id = self.writer.allocate_id();
        let entry = Entry::new(id, name, &EntryStatus::placeholder_dir(), parent_id);
        warn!("automatically created directory {name} in {}", upper.display_name());
        self.writer.save(&entry)?;
        self.link_child(upper, parent_id, id)?;
        self.report.dirs += 1;
        Ok(id)
    }

    fn first_child_of(&self, upper: &Entry, id: u32) -> Result<u32> {
        if id == upper.id {
            Ok(upper.child)
        } else {
            Ok(self.writer.read_entry(id)?.child)
        }
    }

    fn find_sibling(&self, first: u32, name: &str) -> Result<Option<Entry>> {
        let mut id = first;
        let mut steps = 0;
        while id != NO_ENTRY && steps <= self.writer.record_count() {
            let entry = self.writer.read_entry(id)?;
            if entry.name == name.as_bytes() {
                return Ok(Some(entry));
            }
            id = entry.next;
            steps += 1;
        }
        Ok(None)
    }

    /// Makes `child_id` the first child of `parent_id` or appends it to its chain.
    fn link_child(&mut self, upper: &mut Entry, parent_id: u32, child_id: u32) -> Result<()> {
        if parent_id == upper.id {
            if upper.adopt_first_child(child_id) {
                return Ok(());
            }
            return self.fix_prev(upper.child, child_id);
        }
        let mut parent = self.writer.read_entry(parent_id)?;
        if parent.adopt_first_child(child_id) {
            return self.writer.save(&parent);
        }
        self.fix_prev(parent.child, child_id)
    }

    /// Patches the tail of the chain starting at `first` to point at `new_id`.
    fn fix_prev(&mut self, first: u32, new_id: u32) -> Result<()> {
        let mut tail = self.writer.read_entry(first)?;
        let mut steps = 0;
        while tail.next != NO_ENTRY {
            if tail.id == new_id || steps > self.writer.record_count() {
                return Ok(());
            }
            tail = self.writer.read_entry(tail.next)?;
            steps += 1;
        }
        if tail.id == new_id {
            return Ok(());
        }
        tail.next = new_id;
        self.writer.save(&tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listed_paths_are_normalized() {
        assert_eq!(normalize_path("./a//b/").expect("relative"), ["a", "b"]);
        assert_eq!(normalize_path("docs/readme.txt").expect("relative"), ["docs", "readme.txt"]);
        assert!(normalize_path(".").expect("relative").is_empty());
    }

    #[test]
    fn absolute_listed_paths_are_rejected() {
        match normalize_path("/etc/passwd") {
            Err(CatalogError::Plugin(message)) => assert!(message.contains("/etc/passwd")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
