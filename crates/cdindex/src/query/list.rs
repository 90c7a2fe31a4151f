//! Flat listing of every record in id order.

use std::io::Write;

use chrono::{Local, TimeZone};

use crate::error::Result;
use crate::owner::OwnerNames;
use crate::path::PathStack;
use crate::store::IndexReader;
use crate::types::{permission_chars, EntryKind};

fn list_time(secs: u32) -> String {
    Local
        .timestamp_opt(i64::from(secs), 0)
        .single()
        .map(|dt| dt.format("%m-%d-%Y %H:%M").to_string())
        .unwrap_or_default()
}

/// Writes one `ls -l` style line per record; returns the number of lines.
pub fn list_store(reader: &IndexReader, out: &mut dyn Write) -> Result<u32> {
    let mut owners = OwnerNames::new();
    let mut stack = PathStack::new();

    for id in 1..=reader.record_count() {
        let entry = reader.read_entry(id)?;
        stack.sync_to_parent(entry.parent, reader)?;

        let size = if entry.kind == EntryKind::Dir { 0 } else { entry.size };
        write!(
            out,
            "{}{} 1 {} ",
            entry.list_type_char(),
            permission_chars(entry.mode),
            owners.user(entry.uid)
        )?;
        write!(
            out,
            "{} {size} {} {}",
            owners.group(entry.gid),
            list_time(entry.mtime),
            stack.path_of(&entry.display_name())
        )?;
        if entry.kind == EntryKind::Symlink {
            let target = reader.read_symlink(&entry)?.unwrap_or_default();
            write!(out, " -> {target}")?;
        }
        writeln!(out)?;
    }
    Ok(reader.record_count())
}
