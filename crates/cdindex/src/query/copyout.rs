//! Metadata report of one catalogued file.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use log::debug;

use crate::capability::{DumpContext, Registry};
use crate::error::{CatalogError, Result};
use crate::store::IndexReader;
use crate::types::{Entry, EntryKind};

/// Resolves `entry_path` and writes its metadata report to `output`.
pub fn copy_out(
    reader: &IndexReader,
    registry: &Registry,
    entry_path: &str,
    output: &Path,
) -> Result<()> {
    let Some(dumper) = registry.find_dumper(entry_path) else {
        return Err(CatalogError::TypeMismatch(format!(
            "no metadata dumper for {entry_path}"
        )));
    };
    let entry = resolve_leaf(reader, entry_path)?;
    debug!("dumping {entry_path} (record {}) with {}", entry.id, dumper.name);

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(output)?;
    let mut out = BufWriter::new(file);
    let ctx = DumpContext {
        paths: reader.paths(),
        entry: &entry,
    };
    dumper.handler.dump(&ctx, &mut out)?;
    out.flush()?;
    Ok(())
}

/// Walks `path` from the first record; the leaf must be a regular file with stored metadata.
fn resolve_leaf(reader: &IndexReader, path: &str) -> Result<Entry> {
    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    let Some((leaf, dirs)) = components.split_last() else {
        return Err(CatalogError::NotFound(path.to_string()));
    };
    if reader.record_count() == 0 {
        return Err(CatalogError::NotFound(path.to_string()));
    }

    let mut first = 1;
    for dir in dirs {
        let entry = reader
            .find_sibling(first, dir)?
            .ok_or_else(|| CatalogError::NotFound(format!("{dir} in {path}")))?;
        if entry.kind != EntryKind::Dir {
            return Err(CatalogError::TypeMismatch(format!("{dir} is not a directory")));
        }
        first = entry.child;
    }

    let entry = reader
        .find_sibling(first, leaf)?
        .ok_or_else(|| CatalogError::NotFound(path.to_string()))?;
    if entry.kind != EntryKind::File || entry.info == 0 {
        return Err(CatalogError::TypeMismatch(format!(
            "{path} is not a file with recorded metadata"
        )));
    }
    Ok(entry)
}
