//! Path reconstruction through an ancestor stack.
//!
//! Traversals visit records in tree order, so consecutive entries mostly share
//! their ancestry. The stack keeps the `(id, name)` chain of the last resolved
//! parent and only walks `parent` pointers back for the part that changed.

use crate::error::{CatalogError, Result};
use crate::store::IndexReader;
use crate::types::{Entry, NO_ENTRY};

/// Record access needed to rebuild ancestry.
pub trait EntryLookup {
    fn lookup(&self, id: u32) -> Result<Entry>;
    fn record_count(&self) -> u32;
}

impl EntryLookup for IndexReader {
    fn lookup(&self, id: u32) -> Result<Entry> {
        self.read_entry(id)
    }

    fn record_count(&self) -> u32 {
        IndexReader::record_count(self)
    }
}

#[derive(Debug, Default, Clone)]
pub struct PathStack {
    segments: Vec<(u32, String)>,
}

impl PathStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: u32, name: impl Into<String>) {
        self.segments.push((id, name.into()));
    }

    pub fn pop(&mut self) -> Option<(u32, String)> {
        self.segments.pop()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn top(&self) -> Option<u32> {
        self.segments.last().map(|(id, _)| *id)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(|(_, name)| name.as_str())
    }

    /// Makes the stack end at `parent`, walking back only the missing part.
    pub fn sync_to_parent<L: EntryLookup + ?Sized>(&mut self, parent: u32, lookup: &L) -> Result<()> {
        if parent == NO_ENTRY {
            self.segments.clear();
            return Ok(());
        }
        if self.top() == Some(parent) {
            return Ok(());
        }

        let mut missing = Vec::new();
        let mut id = parent;
        loop {
            if id == NO_ENTRY {
                self.segments.clear();
                break;
            }
            if let Some(pos) = self.segments.iter().rposition(|(member, _)| *member == id) {
                self.segments.truncate(pos + 1);
                break;
            }
            if missing.len() as u32 > lookup.record_count() {
                return Err(CatalogError::NotFound(format!(
                    "ancestry of record {parent} does not reach the root"
                )));
            }
            let entry = lookup.lookup(id)?;
            id = entry.parent;
            missing.push((entry.id, entry.display_name().into_owned()));
        }

        self.segments.extend(missing.into_iter().rev());
        Ok(())
    }

    /// Joins the stacked names with `/`.
    pub fn join(&self) -> String {
        let mut path = String::new();
        for name in self.names() {
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(name);
        }
        path
    }

    /// Full path of a child named `name` below the stack.
    pub fn path_of(&self, name: &str) -> String {
        let mut path = self.join();
        if !path.is_empty() {
            path.push('/');
        }
        path.push_str(name);
        path
    }
}
