//! Filename-dispatched capabilities: container plugins, metadata extractors and dumpers.
//!
//! A [`Registry`] is built once per command and passed to the builder and the
//! query engine. Each list is searched in registration order, first match wins.

pub mod archive;
pub mod audio;
pub mod external;
pub mod picture;
pub mod raw;
pub mod video;

use std::io::Write;
use std::path::Path;

use log::warn;
use once_cell::sync::OnceCell;
use regex::{Regex, RegexBuilder};

use crate::config::CatalogConfig;
use crate::error::Result;
use crate::store::{SideStores, StorePaths};
use crate::types::{Entry, EntryStatus};

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// One item yielded by a container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    /// Slash-separated path inside the container.
    pub path: String,
    pub link_target: Option<String>,
    pub status: EntryStatus,
}

pub type Listing = Box<dyn Iterator<Item = Result<ListedEntry>>>;

/// Lists the contents of a container file.
pub trait ContainerPlugin {
    /// Open failures of best-effort plugins are not reported as errors.
    fn best_effort(&self) -> bool {
        false
    }

    fn open(&self, path: &Path) -> Result<Listing>;
}

/// Captures format-specific metadata of one regular file.
pub trait MetadataExtractor {
    /// Returns the side-store offset of the written record, if any.
    fn extract(&self, source: &Path, entry: &Entry, sides: &mut SideStores) -> Result<Option<u32>>;
}

/// Inputs of a [`MetadataDumper`].
pub struct DumpContext<'a> {
    pub paths: &'a StorePaths,
    pub entry: &'a Entry,
}

/// Renders stored metadata as a human-readable report.
pub trait MetadataDumper {
    fn dump(&self, ctx: &DumpContext<'_>, out: &mut dyn Write) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// A handler bound to a case-insensitive filename pattern compiled on first use.
pub struct Capability<H: ?Sized> {
    pub name: &'static str,
    pattern: String,
    compiled: OnceCell<Option<Regex>>,
    pub handler: Box<H>,
}

impl<H: ?Sized> Capability<H> {
    pub fn new(name: &'static str, pattern: impl Into<String>, handler: Box<H>) -> Self {
        Self {
            name,
            pattern: pattern.into(),
            compiled: OnceCell::new(),
            handler,
        }
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.compiled
            .get_or_init(|| {
                match RegexBuilder::new(&self.pattern).case_insensitive(true).build() {
                    Ok(regex) => Some(regex),
                    Err(err) => {
                        warn!("invalid pattern for {}: {err}", self.name);
                        None
                    }
                }
            })
            .as_ref()
            .is_some_and(|regex| regex.is_match(file_name))
    }
}

#[derive(Default)]
pub struct Registry {
    plugins: Vec<Capability<dyn ContainerPlugin>>,
    extractors: Vec<Capability<dyn MetadataExtractor>>,
    dumpers: Vec<Capability<dyn MetadataDumper>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the built-in capabilities in dispatch order.
    pub fn with_defaults(config: &CatalogConfig) -> Self {
        let mut registry = Self::new();
        registry.register_plugin(Capability::new(
            "archiver",
            archive::PATTERN,
            Box::new(archive::TarPlugin),
        ));
        registry.register_plugin(Capability::new(
            "external",
            external::PATTERN,
            Box::new(external::ExternalPlugin::new(config.tools_dir.clone())),
        ));
        registry.register_extractor(Capability::new(
            "audio",
            audio::PATTERN,
            Box::new(audio::AudioExtractor),
        ));
        registry.register_extractor(Capability::new(
            "picture",
            picture::PATTERN,
            Box::new(picture::PictureExtractor::new(config.thumbnails)),
        ));
        registry.register_extractor(Capability::new(
            "rawimage",
            raw::PATTERN,
            Box::new(raw::RawImageExtractor::new(config.thumbnails)),
        ));
        registry.register_dumper(Capability::new(
            "audio",
            audio::PATTERN,
            Box::new(audio::AudioDumper),
        ));
        registry.register_dumper(Capability::new(
            "picture",
            picture::DUMP_PATTERN,
            Box::new(picture::PictureDumper),
        ));
        registry.register_dumper(Capability::new(
            "video",
            video::PATTERN,
            Box::new(video::VideoDumper),
        ));
        registry
    }

    pub fn register_plugin(&mut self, capability: Capability<dyn ContainerPlugin>) {
        self.plugins.push(capability);
    }

    pub fn register_extractor(&mut self, capability: Capability<dyn MetadataExtractor>) {
        self.extractors.push(capability);
    }

    pub fn register_dumper(&mut self, capability: Capability<dyn MetadataDumper>) {
        self.dumpers.push(capability);
    }

    pub fn find_plugin(&self, file_name: &str) -> Option<&Capability<dyn ContainerPlugin>> {
        self.plugins.iter().find(|c| c.matches(file_name))
    }

    pub fn find_extractor(&self, file_name: &str) -> Option<&Capability<dyn MetadataExtractor>> {
        self.extractors.iter().find(|c| c.matches(file_name))
    }

    pub fn find_dumper(&self, file_name: &str) -> Option<&Capability<dyn MetadataDumper>> {
        self.dumpers.iter().find(|c| c.matches(file_name))
    }
}

// ---------------------------------------------------------------------------
// Report helpers shared by dumpers
// ---------------------------------------------------------------------------

/// Column width of report labels, colon included.
pub const LABEL_WIDTH: usize = 15;

/// Writes `label: value`, padded so values line up; empty values print `-`.
pub fn write_field(out: &mut dyn Write, label: &str, value: &str) -> std::io::Result<()> {
    let value = if value.is_empty() { "-" } else { value };
    writeln!(out, "{:<width$}{value}", format!("{label}:"), width = LABEL_WIDTH)
}

pub fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// Thumbnail files of entry `id` that exist in the store's data directory.
///
/// `<id>.jpg` comes first, then `<id>-1.jpg`, `<id>-2.jpg`, up to nine, stopping at the first gap.
pub fn existing_thumbnails(paths: &StorePaths, id: u32) -> Vec<std::path::PathBuf> {
    let dir = paths.data_dir();
    let mut found = Vec::new();
    let first = dir.join(format!("{id}.jpg"));
    if !first.is_file() {
        return found;
    }
    found.push(first);
    for n in 1..=9 {
        let next = dir.join(format!("{id}-{n}.jpg"));
        if !next.is_file() {
            break;
        }
        found.push(next);
    }
    found
}

/// Lists thumbnails under a `Thumbnails:` label.
pub fn write_thumbnails(out: &mut dyn Write, paths: &StorePaths, id: u32) -> std::io::Result<()> {
    let thumbnails = existing_thumbnails(paths, id);
    if thumbnails.is_empty() {
        return write_field(out, "Thumbnails", "");
    }
    writeln!(out, "Thumbnails:")?;
    for path in thumbnails {
        writeln!(out, "  {}", path.display())?;
    }
    Ok(())
}

/// Formats an epoch time as `asctime` does, without its newline; 0 prints empty.
pub fn asctime(secs: u32) -> String {
    use chrono::{Local, TimeZone};
    if secs == 0 {
        return String::new();
    }
    match Local.timestamp_opt(i64::from(secs), 0).single() {
        Some(dt) => dt.format("%a %b %e %H:%M:%S %Y").to_string(),
        None => String::new(),
    }
}

pub fn report_trailer(out: &mut dyn Write) -> std::io::Result<()> {
    write!(out, "\n---\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct Noop;

    impl MetadataDumper for Noop {
        fn dump(&self, _ctx: &DumpContext<'_>, _out: &mut dyn Write) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn patterns_match_case_insensitively() {
        let capability = Capability::new("audio", r"\.mp3$", Box::new(Noop) as Box<dyn MetadataDumper>);
        assert!(capability.matches("song.MP3"));
        assert!(!capability.matches("song.mp3.txt"));
    }

    #[test]
    fn invalid_pattern_never_matches() {
        let capability = Capability::new("broken", r"(", Box::new(Noop) as Box<dyn MetadataDumper>);
        assert!(!capability.matches("anything"));
        assert!(!capability.matches("("));
    }

    #[test]
    fn first_registered_match_wins() {
        let mut registry = Registry::new();
        registry.register_dumper(Capability::new("first", r"\.jpg$", Box::new(Noop)));
        registry.register_dumper(Capability::new("second", r".+$", Box::new(Noop)));
        assert_eq!(registry.find_dumper("a.jpg").map(|c| c.name), Some("first"));
        assert_eq!(registry.find_dumper("a.png").map(|c| c.name), Some("second"));
        assert!(registry.find_plugin("a.tar").is_none());
    }

    #[test]
    fn defaults_dispatch_by_extension() {
        let registry = Registry::with_defaults(&CatalogConfig::default());
        assert_eq!(registry.find_plugin("x.tar.gz").map(|c| c.name), Some("archiver"));
        assert_eq!(registry.find_plugin("x.deb").map(|c| c.name), Some("external"));
        assert_eq!(registry.find_extractor("x.jpeg").map(|c| c.name), Some("picture"));
        assert_eq!(registry.find_extractor("x.NEF").map(|c| c.name), Some("rawimage"));
        assert_eq!(registry.find_dumper("x.cr2").map(|c| c.name), Some("picture"));
        assert_eq!(registry.find_dumper("x.mkv").map(|c| c.name), Some("video"));
        assert!(registry.find_extractor("x.txt").is_none());
    }

    #[test]
    fn fields_are_padded_to_label_width() {
        let mut out = Vec::new();
        write_field(&mut out, "File", "song.mp3").expect("write");
        write_field(&mut out, "Album", "").expect("write");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "File:          song.mp3\nAlbum:         -\n"
        );
    }

    #[test]
    fn thumbnails_stop_at_first_gap() {
        let dir = tempdir().expect("tempdir");
        let paths = StorePaths::new(dir.path().join("disc"));
        std::fs::create_dir(paths.data_dir()).expect("mkdir");
        for name in ["7.jpg", "7-1.jpg", "7-3.jpg"] {
            std::fs::write(paths.data_dir().join(name), b"jpg").expect("write");
        }
        let found = existing_thumbnails(&paths, 7);
        assert_eq!(found.len(), 2);
        assert!(existing_thumbnails(&paths, 8).is_empty());
    }
}
