//! Listings produced by external helper tools.
//!
//! Each tool is run as `TOOL list FILE` and prints one line per member:
//! `TRWXRWXRWX UID GID SIZE YYYY-MM-DD HH:MM PATH[ -> TARGET]`.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use chrono::{Local, NaiveDateTime, TimeZone};
use log::{debug, info};
use regex::{Regex, RegexBuilder};

use super::{ContainerPlugin, ListedEntry, Listing};
use crate::error::{CatalogError, Result};
use crate::types::{clamp_time, EntryKind, EntryStatus};

pub const PATTERN: &str = ".+$";

const TOOLS: [(&str, &str); 4] = [
    (r"\.deb$", "deb"),
    (r"\.rpm$", "rpm"),
    (r"\.rar$", "rar"),
    (r"\.zip$", "zip"),
];

pub struct ExternalPlugin {
    tools_dir: PathBuf,
    tools: Vec<(Regex, &'static str)>,
}

impl ExternalPlugin {
    pub fn new(tools_dir: PathBuf) -> Self {
        let tools = TOOLS
            .iter()
            .filter_map(|(pattern, tool)| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .ok()
                    .map(|regex| (regex, *tool))
            })
            .collect();
        Self { tools_dir, tools }
    }

    fn tool_for(&self, file_name: &str) -> Option<PathBuf> {
        self.tools
            .iter()
            .find(|(regex, _)| regex.is_match(file_name))
            .map(|(_, tool)| self.tools_dir.join(tool))
    }
}

impl ContainerPlugin for ExternalPlugin {
    fn best_effort(&self) -> bool {
        true
    }

    fn open(&self, path: &Path) -> Result<Listing> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tool = self
            .tool_for(&file_name)
            .ok_or_else(|| CatalogError::Plugin(format!("no listing tool for {file_name}")))?;

        info!("listing {} with {}", path.display(), tool.display());
        let mut child = Command::new(&tool)
            .arg("list")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|err| {
                CatalogError::Plugin(format!("cannot run {}: {err}", tool.display()))
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CatalogError::Plugin(format!("no output from {}", tool.display())))?;

        Ok(Box::new(ToolListing {
            tool,
            lines: BufReader::new(stdout).lines(),
            child: Some(child),
        }))
    }
}

/// Streams parsed lines, then reports the tool's exit status.
struct ToolListing {
    tool: PathBuf,
    lines: std::io::Lines<BufReader<std::process::ChildStdout>>,
    child: Option<Child>,
}

impl Iterator for ToolListing {
    type Item = Result<ListedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next() {
                Some(Ok(line)) if line.trim().is_empty() => continue,
                Some(Ok(line)) => return Some(parse_line(&line)),
                Some(Err(err)) => return Some(Err(err.into())),
                None => break,
            }
        }

        let mut child = self.child.take()?;
        match child.wait() {
            Ok(status) if status.success() => {
                debug!("{} finished", self.tool.display());
                None
            }
            Ok(status) => Some(Err(CatalogError::Plugin(format!(
                "{} exited with {status}",
                self.tool.display()
            )))),
            Err(err) => Some(Err(err.into())),
        }
    }
}

impl Drop for ToolListing {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Parses one listing line.
pub fn parse_line(line: &str) -> Result<ListedEntry> {
    let malformed = || CatalogError::Plugin(format!("malformed listing line: {line}"));

    let mut rest = line.trim_end_matches(['\r', '\n']);
    let mut fields = [""; 6];
    for field in fields.iter_mut() {
        rest = rest.trim_start_matches(' ');
        let end = rest.find(' ').ok_or_else(malformed)?;
        *field = &rest[..end];
        rest = &rest[end..];
    }
    let rest = rest.strip_prefix(' ').ok_or_else(malformed)?;
    let [perms, uid, gid, size, date, time] = fields;

    let mut chars = perms.chars();
    let (kind, type_bits) = match chars.next() {
        Some('d') => (EntryKind::Dir, 0o040000),
        Some('l') => (EntryKind::Symlink, 0o120000),
        Some('-') => (EntryKind::File, 0o100000),
        _ => return Err(malformed()),
    };
    let permissions = parse_permissions(chars.as_str()).ok_or_else(malformed)?;

    let (path, link_target) = match kind {
        EntryKind::Symlink => match rest.split_once(" -> ") {
            Some((path, target)) => (path.to_string(), Some(target.to_string())),
            None => (rest.to_string(), None),
        },
        _ => (rest.to_string(), None),
    };
    if path.is_empty() {
        return Err(malformed());
    }

    let mtime = NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M")
        .ok()
        .and_then(|naive| Local.from_local_datetime(&naive).single())
        .map(|dt| clamp_time(dt.timestamp()))
        .ok_or_else(malformed)?;

    Ok(ListedEntry {
        path,
        link_target,
        status: EntryStatus {
            kind,
            mode: (type_bits | permissions) as u16,
            mtime,
            uid: uid.parse().map_err(|_| malformed())?,
            gid: gid.parse().map_err(|_| malformed())?,
            size: size.parse().map_err(|_| malformed())?,
        },
    })
}

/// Parses nine `rwx` characters into permission bits.
fn parse_permissions(text: &str) -> Option<u32> {
    let bytes = text.as_bytes();
    if bytes.len() != 9 {
        return None;
    }
    let mut bits = 0u32;
    for (index, byte) in bytes.iter().enumerate() {
        let expected = b"rwx"[index % 3];
        bits <<= 1;
        if *byte == expected {
            bits |= 1;
        } else if *byte != b'-' {
            return None;
        }
    }
    Some(bits)
}
