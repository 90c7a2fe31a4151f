//! Index construction.
//!
//! The builder walks a source directory in name order, writes one record per
//! walked object and descends into container files through the plugins of a
//! [`Registry`]. Records are saved as soon as they are created; the previous
//! sibling is re-saved once the next sibling's id is known.

mod ingest;
mod walk;

use std::path::Path;

use log::info;

use crate::capability::Registry;
use crate::error::Result;
use crate::store::{IndexHeader, IndexWriter, StorePaths};
use crate::types::Entry;

pub use ingest::normalize_path;

/// Counters collected during one build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub dirs: u32,
    pub files: u32,
    pub symlinks: u32,
    /// Files whose contents were listed by a plugin.
    pub containers: u32,
    /// Devices, sockets and fifos.
    pub skipped: u32,
    pub stat_failures: u32,
    /// Containers indexed with errors.
    pub partial: u32,
    /// Listed entries whose parent could not be resolved.
    pub unresolved: u32,
}

impl BuildReport {
    pub fn entries(&self) -> u32 {
        self.dirs + self.files + self.symlinks
    }
}

pub(crate) struct Builder<'a> {
    writer: IndexWriter,
    registry: &'a Registry,
    report: BuildReport,
}

/// Creates the store at `store` and fills it from the tree under `source`.
pub fn build_index(
    store: &StorePaths,
    source: &Path,
    header: &IndexHeader,
    registry: &Registry,
) -> Result<BuildReport> {
    let writer = IndexWriter::create(store.clone(), header)?;
    let mut builder = Builder {
        writer,
        registry,
        report: BuildReport::default(),
    };

    info!(
        "indexing {} into {}",
        source.display(),
        store.index().display()
    );
    let mut root = Entry::root();
    builder.walk_dir(source, &mut root)?;

    let report = builder.report;
    info!(
        "indexed {} entries: {} dirs, {} files, {} symlinks, {} containers",
        builder.writer.record_count(),
        report.dirs,
        report.files,
        report.symlinks,
        report.containers
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::archive::{self, tests::write_tar};
    use crate::capability::Capability;
    use crate::store::IndexReader;
    use crate::types::EntryKind;
    use std::collections::HashSet;
    use std::fs::{self, File};
    use std::os::unix::fs::symlink;
    use tar::EntryType;
    use tempfile::tempdir;

    fn tar_registry() -> Registry {
        let mut registry = Registry::new();
        registry.register_plugin(Capability::new(
            "archiver",
            archive::PATTERN,
            Box::new(archive::TarPlugin),
        ));
        registry
    }

    fn build(source: &Path, store: &Path, registry: &Registry) -> (BuildReport, IndexReader) {
        let paths = StorePaths::new(store);
        let report =
            build_index(&paths, source, &IndexHeader::default(), registry).expect("build index");
        let reader = IndexReader::open(paths).expect("open index");
        (report, reader)
    }

    fn chain(reader: &IndexReader, first: u32) -> Vec<Entry> {
        let mut entries = Vec::new();
        let mut id = first;
        while id != 0 {
            let entry = reader.read_entry(id).expect("read entry");
            id = entry.next;
            entries.push(entry);
        }
        entries
    }

    fn names(entries: &[Entry]) -> Vec<String> {
        entries
            .iter()
            .map(|entry| entry.display_name().into_owned())
            .collect()
    }

    fn child_named(reader: &IndexReader, first: u32, name: &str) -> Entry {
        reader
            .find_sibling(first, name)
            .expect("find sibling")
            .unwrap_or_else(|| panic!("no entry named {name}"))
    }

    /// Visits every entry reachable from the root chain, checking each is seen once.
    fn reachable(reader: &IndexReader) -> HashSet<u32> {
        let mut seen = HashSet::new();
        let mut pending = vec![(1u32, 0u32)];
        while let Some((first, parent)) = pending.pop() {
            for entry in chain(reader, first) {
                assert_eq!(entry.parent, parent, "parent of {}", entry.display_name());
                assert!(seen.insert(entry.id), "{} reached twice", entry.display_name());
                if entry.child != 0 {
                    pending.push((entry.child, entry.id));
                }
            }
        }
        seen
    }

    fn sample_tree(root: &Path) {
        fs::create_dir_all(root.join("music/rock")).expect("mkdir");
        fs::write(root.join("music/rock/song.txt"), b"lyrics").expect("write");
        fs::write(root.join("music/list.txt"), b"1234567890").expect("write");
        fs::write(root.join("readme"), b"hi").expect("write");
        symlink("readme", root.join("latest")).expect("symlink");
    }

    #[test]
    fn walked_tree_is_reachable_in_name_order() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("src");
        sample_tree(&source);

        let (report, reader) = build(&source, &dir.path().join("disc"), &Registry::new());
        assert_eq!(report.dirs, 2);
        assert_eq!(report.files, 3);
        assert_eq!(report.symlinks, 1);
        assert_eq!(reader.record_count(), 6);

        let top = chain(&reader, 1);
        assert_eq!(names(&top), ["latest", "music", "readme"]);
        let music = &top[1];
        assert_eq!(music.kind, EntryKind::Dir);
        assert_eq!(names(&chain(&reader, music.child)), ["list.txt", "rock"]);

        let seen = reachable(&reader);
        assert_eq!(seen.len(), reader.record_count() as usize);
    }

    #[test]
    fn walked_status_and_symlinks_are_recorded() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("src");
        sample_tree(&source);

        let (_, reader) = build(&source, &dir.path().join("disc"), &Registry::new());
        let music = child_named(&reader, 1, "music");
        let list = child_named(&reader, music.child, "list.txt");
        assert_eq!(list.kind, EntryKind::File);
        assert_eq!(list.size, 10);
        assert_eq!(list.mode & 0o170000, 0o100000);

        let latest = child_named(&reader, 1, "latest");
        assert_eq!(latest.kind, EntryKind::Symlink);
        assert_eq!(latest.size, 6);
        assert_eq!(reader.read_symlink(&latest).expect("target").as_deref(), Some("readme"));
    }

    #[test]
    fn non_utf8_file_names_are_stored_verbatim() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("src");
        fs::create_dir(&source).expect("mkdir");
        let raw = b"caf\xe9.txt";
        fs::write(source.join(OsStr::from_bytes(raw)), b"latin-1").expect("write");

        let (_, reader) = build(&source, &dir.path().join("disc"), &Registry::new());
        let entry = reader.read_entry(1).expect("entry");
        assert_eq!(entry.name, raw);
        assert_eq!(entry.size, 7);
        assert_eq!(entry.display_name(), "caf\u{fffd}.txt");
    }

    #[test]
    fn special_files_are_skipped() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("src");
        fs::create_dir(&source).expect("mkdir");
        fs::write(source.join("a.txt"), b"a").expect("write");
        let _socket =
            std::os::unix::net::UnixListener::bind(source.join("b.sock")).expect("bind socket");
        fs::write(source.join("c.txt"), b"c").expect("write");

        let (report, reader) = build(&source, &dir.path().join("disc"), &Registry::new());
        assert_eq!(report.skipped, 1);
        assert_eq!(names(&chain(&reader, 1)), ["a.txt", "c.txt"]);
    }

    #[test]
    fn empty_source_writes_header_only() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("src");
        fs::create_dir(&source).expect("mkdir");

        let (report, reader) = build(&source, &dir.path().join("disc"), &Registry::new());
        assert_eq!(report, BuildReport::default());
        assert_eq!(reader.record_count(), 0);
    }

    #[test]
    fn missing_source_fails() {
        let dir = tempdir().expect("tempdir");
        let paths = StorePaths::new(dir.path().join("disc"));
        let result = build_index(
            &paths,
            &dir.path().join("absent"),
            &IndexHeader::default(),
            &Registry::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn container_becomes_archive_root() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("src");
        fs::create_dir(&source).expect("mkdir");
        write_tar(
            File::create(source.join("bundle.tar")).expect("create"),
            &[
                ("docs/", EntryType::Directory, ""),
                ("docs/readme.txt", EntryType::Regular, "hello world"),
                ("docs/latest", EntryType::Symlink, "readme.txt"),
            ],
        );
        fs::write(source.join("notes.txt"), b"plain").expect("write");

        let (report, reader) = build(&source, &dir.path().join("disc"), &tar_registry());
        assert_eq!(report.containers, 1);
        assert_eq!(report.partial, 0);

        let bundle = child_named(&reader, 1, "bundle.tar");
        assert_eq!(bundle.kind, EntryKind::Archive);
        let docs = reader.read_entry(bundle.child).expect("first child");
        assert_eq!(docs.name, b"docs");
        assert_eq!(docs.parent, bundle.id);
        assert_eq!(docs.mode, 0o040755);

        let inner = chain(&reader, docs.child);
        assert_eq!(names(&inner), ["readme.txt", "latest"]);
        assert_eq!(inner[0].size, 11);
        assert_eq!(
            reader.read_symlink(&inner[1]).expect("target").as_deref(),
            Some("readme.txt")
        );

        let notes = child_named(&reader, 1, "notes.txt");
        assert_eq!(notes.kind, EntryKind::File);
        assert_eq!(reachable(&reader).len(), reader.record_count() as usize);
    }

    #[test]
    fn out_of_order_members_repair_sibling_chains() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("src");
        fs::create_dir(&source).expect("mkdir");
        write_tar(
            File::create(source.join("mixed.tar")).expect("create"),
            &[
                ("a/x.txt", EntryType::Regular, "x"),
                ("b.txt", EntryType::Regular, "b"),
                ("a/y.txt", EntryType::Regular, "yy"),
                ("./a/", EntryType::Directory, ""),
                ("c/", EntryType::Directory, ""),
            ],
        );

        let (report, reader) = build(&source, &dir.path().join("disc"), &tar_registry());
        assert_eq!(report.unresolved, 0);
        assert_eq!(report.partial, 0);

        let mixed = child_named(&reader, 1, "mixed.tar");
        let top = chain(&reader, mixed.child);
        assert_eq!(names(&top), ["a", "b.txt", "c"]);

        let a = &top[0];
        assert_eq!(a.kind, EntryKind::Dir);
        assert_eq!(a.mode, 0o040755, "listed status replaces the placeholder");
        assert_eq!(a.mtime, 1_600_000_000);
        assert_eq!(names(&chain(&reader, a.child)), ["x.txt", "y.txt"]);
        assert_eq!(reachable(&reader).len(), reader.record_count() as usize);
    }

    #[test]
    fn deeper_gaps_are_reported_not_created() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("src");
        fs::create_dir(&source).expect("mkdir");
        write_tar(
            File::create(source.join("deep.tar")).expect("create"),
            &[
                ("p/q/r.txt", EntryType::Regular, "r"),
                ("top.txt", EntryType::Regular, "t"),
            ],
        );

        let (report, reader) = build(&source, &dir.path().join("disc"), &tar_registry());
        assert_eq!(report.unresolved, 1);
        assert_eq!(report.partial, 1);

        let deep = child_named(&reader, 1, "deep.tar");
        assert_eq!(deep.kind, EntryKind::Archive);
        assert_eq!(names(&chain(&reader, deep.child)), ["top.txt"]);
        assert_eq!(reachable(&reader).len(), reader.record_count() as usize);
    }

    #[test]
    fn unreadable_container_stays_plain_file() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("src");
        fs::create_dir(&source).expect("mkdir");
        fs::write(source.join("broken.tar.gz"), b"not gzip at all").expect("write");

        let (report, reader) = build(&source, &dir.path().join("disc"), &tar_registry());
        assert_eq!(report.containers, 0);
        let broken = reader.read_entry(1).expect("entry");
        assert_eq!(broken.kind, EntryKind::File);
        assert_eq!(broken.child, 0);
    }
}
