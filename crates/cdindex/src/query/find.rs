//! Predicate search across the stores of a directory.

use std::fs;
use std::io::Write;
use std::path::Path;

use glob::{MatchOptions, Pattern};
use log::{debug, warn};

use super::format::{MatchContext, OutputFormat};
use super::predicate::Predicate;
use crate::error::{CatalogError, Result};
use crate::owner::OwnerNames;
use crate::path::PathStack;
use crate::store::{has_index_extension, IndexReader, StorePaths};
use crate::types::{Entry, EntryKind, NO_ENTRY};

/// A parsed find command line.
#[derive(Debug, Clone, Default)]
pub struct FindRequest {
    /// Glob over store labels.
    pub mask: Option<String>,
    /// Start path inside each store, without leading or trailing slashes.
    pub path: Option<String>,
    pub predicates: Vec<Predicate>,
    pub format: Option<OutputFormat>,
    /// Search the current directory instead of the store directory.
    pub no_default_dir: bool,
    /// Do not descend into archive roots.
    pub no_archives: bool,
}

fn is_option(arg: &str) -> bool {
    arg.starts_with('-') && !arg[1..].starts_with(|c: char| c.is_ascii_digit())
}

fn missing_argument(option: &str) -> CatalogError {
    CatalogError::QueryParse(format!("missing argument to `{option}'"))
}

fn normalize_start(path: &str) -> Option<String> {
    let joined = path
        .split('/')
        .filter(|component| !component.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    (!joined.is_empty()).then_some(joined)
}

impl FindRequest {
    /// Parses `[mask][/path] [predicates...]` in find(1) style.
    pub fn parse_args<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let mut request = Self::default();
        let mut args = args.iter().map(AsRef::as_ref).peekable();

        if let Some(first) = args.next_if(|arg| !arg.starts_with('-')) {
            match first.strip_prefix('/') {
                Some(path) => request.path = normalize_start(path),
                None => {
                    let (mask, path) = first.split_once('/').unwrap_or((first, ""));
                    request.mask = (!mask.is_empty()).then(|| mask.to_string());
                    request.path = normalize_start(path);
                }
            }
        }

        let mut pending: Option<&str> = None;
        let mut awaiting_format = false;
        for arg in args {
            if is_option(arg) {
                if let Some(option) = pending {
                    return Err(missing_argument(option));
                }
                if awaiting_format {
                    return Err(missing_argument("-printf"));
                }
                match &arg[1..] {
                    "nodefdir" => request.no_default_dir = true,
                    "noarc" => request.no_archives = true,
                    "printf" => awaiting_format = true,
                    name if Predicate::NAMES.contains(&name) => pending = Some(arg),
                    _ => {
                        return Err(CatalogError::QueryParse(format!("invalid predicate `{arg}'")));
                    }
                }
            } else if let Some(option) = pending.take() {
                request.predicates.push(Predicate::parse(&option[1..], arg)?);
            } else if awaiting_format {
                request.format = Some(OutputFormat::parse(arg));
                awaiting_format = false;
            } else {
                return Err(CatalogError::QueryParse(
                    "paths must precede expression".to_string(),
                ));
            }
        }

        if let Some(option) = pending {
            return Err(missing_argument(option));
        }
        if awaiting_format {
            return Err(missing_argument("-printf"));
        }
        Ok(request)
    }

    /// True when every predicate accepts `entry`.
    pub fn matches(&self, entry: &Entry) -> bool {
        self.predicates.iter().all(|predicate| predicate.matches(entry))
    }

    fn start_components(&self) -> Vec<&str> {
        self.path
            .as_deref()
            .map(|path| path.split('/').collect())
            .unwrap_or_default()
    }
}

/// Stores in `dir` whose label matches `mask`, in case-insensitive label order.
pub fn matching_stores(dir: &Path, mask: Option<&str>) -> Result<Vec<StorePaths>> {
    let mask = mask
        .map(Pattern::new)
        .transpose()
        .map_err(|err| CatalogError::QueryParse(format!("invalid store mask: {err}")))?;
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    let mut stores = Vec::new();
    for item in fs::read_dir(dir)? {
        let item = item?;
        if !item.file_type()?.is_file() || !has_index_extension(&item.path()) {
            continue;
        }
        let paths = StorePaths::new(item.path());
        if let Some(mask) = &mask {
            if !mask.matches_with(&paths.label(), options) {
                continue;
            }
        }
        stores.push(paths);
    }
    stores.sort_by_cached_key(|paths| paths.label().to_ascii_lowercase());
    Ok(stores)
}

/// Runs `request` against every matching store in `dir`; returns the number of matches.
pub fn search_dir(dir: &Path, request: &FindRequest, out: &mut dyn Write) -> Result<u32> {
    let mut owners = OwnerNames::new();
    let mut matches = 0;
    for paths in matching_stores(dir, request.mask.as_deref())? {
        let label = paths.label();
        let reader = match IndexReader::open(paths) {
            Ok(reader) => reader,
            Err(err) => {
                warn!("could not open cd index {label}: {err}");
                continue;
            }
        };
        matches += find_in_store(&reader, request, &mut owners, out)?;
    }
    Ok(matches)
}

/// Runs `request` against one store.
pub fn find_in_store(
    reader: &IndexReader,
    request: &FindRequest,
    owners: &mut OwnerNames,
    out: &mut dyn Write,
) -> Result<u32> {
    let label = reader.paths().label();
    let Some(first) = resolve_start(reader, &request.start_components())? else {
        debug!("start path not found in {label}");
        return Ok(0);
    };

    let mut search = Search {
        reader,
        request,
        owners,
        out,
        label,
        stack: PathStack::new(),
        matches: 0,
    };
    search.find_in(first)?;
    Ok(search.matches)
}

/// First entry below the start path; every component must be a directory or an archive root with children.
fn resolve_start(reader: &IndexReader, components: &[&str]) -> Result<Option<u32>> {
    if reader.record_count() == 0 {
        return Ok(None);
    }
    let mut first = 1;
    for name in components {
        match reader.find_sibling(first, name)? {
            Some(entry)
                if entry.child != NO_ENTRY
                    && matches!(entry.kind, EntryKind::Dir | EntryKind::Archive) =>
            {
                first = entry.child;
            }
            _ => return Ok(None),
        }
    }
    Ok(Some(first))
}

struct Search<'a> {
    reader: &'a IndexReader,
    request: &'a FindRequest,
    owners: &'a mut OwnerNames,
    out: &'a mut dyn Write,
    label: String,
    stack: PathStack,
    matches: u32,
}

impl Search<'_> {
    fn find_in(&mut self, first: u32) -> Result<()> {
        let limit = self.reader.record_count();
        let mut id = first;
        let mut steps = 0;
        while id != NO_ENTRY && steps <= limit {
            let entry = self.reader.read_entry(id)?;
            if self.request.matches(&entry) {
                self.emit(&entry)?;
            }

            let descend = entry.child != NO_ENTRY
                && match entry.kind {
                    EntryKind::Dir => true,
                    EntryKind::Archive => !self.request.no_archives,
                    _ => false,
                };
            if descend && self.stack.len() < limit as usize {
                self.stack.push(entry.id, entry.display_name());
                self.find_in(entry.child)?;
                self.stack.pop();
            }

            id = entry.next;
            steps += 1;
        }
        Ok(())
    }

    fn emit(&mut self, entry: &Entry) -> Result<()> {
        let ctx = MatchContext {
            label: &self.label,
            start: self.request.path.as_deref(),
            stack: &self.stack,
            entry,
            links: self.reader,
        };
        match &self.request.format {
            Some(format) => format.render(&ctx, self.owners, self.out)?,
            None => writeln!(self.out, "{}: {}", self.label, ctx.path())?,
        }
        self.matches += 1;
        Ok(())
    }
}
