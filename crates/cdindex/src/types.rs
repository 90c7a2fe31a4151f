//! Catalogue entry types.
//!
//! An [`Entry`] is the in-memory form of one fixed-size record. Only the
//! in-memory form carries an `id`; on disk the id is implied by the record's
//! slot (see [`crate::store::RecordLayout`]).

use std::borrow::Cow;
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;

use bitflags::bitflags;

/// Maximum stored name length in bytes.
pub const NAME_MAX: usize = 255;

/// Reserved id marking an absent parent, child or sibling.
pub const NO_ENTRY: u32 = 0;

/// Entry type as stored in the record's type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryKind {
    /// Directory
    Dir = 0,
    /// Regular file whose contents were listed by a plugin
    Archive = 1,
    /// Regular file
    File = 2,
    /// Symbolic link
    Symlink = 3,
}

impl EntryKind {
    /// Creates from a stored type byte.
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Dir),
            1 => Some(Self::Archive),
            2 => Some(Self::File),
            3 => Some(Self::Symlink),
            _ => None,
        }
    }

    /// Classifies a link-unfollowed file type; devices, sockets and fifos are unsupported.
    pub fn from_file_type(file_type: std::fs::FileType) -> Option<Self> {
        if file_type.is_dir() {
            Some(Self::Dir)
        } else if file_type.is_file() {
            Some(Self::File)
        } else if file_type.is_symlink() {
            Some(Self::Symlink)
        } else {
            None
        }
    }

    /// Classifies the file-type bits of a `st_mode` value.
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFDIR => Self::Dir,
            S_IFLNK => Self::Symlink,
            _ => Self::File,
        }
    }

    /// Entries whose `child` chain can be descended.
    #[inline]
    pub fn is_container(self) -> bool {
        matches!(self, Self::Dir | Self::Archive)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dir => "directory",
            Self::Archive => "archive",
            Self::File => "file",
            Self::Symlink => "symlink",
        }
    }
}

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;

bitflags! {
    /// Permission bits of the stored `mode`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModeBits: u16 {
        const USER_READ = 0o400;
        const USER_WRITE = 0o200;
        const USER_EXEC = 0o100;
        const GROUP_READ = 0o040;
        const GROUP_WRITE = 0o020;
        const GROUP_EXEC = 0o010;
        const OTHER_READ = 0o004;
        const OTHER_WRITE = 0o002;
        const OTHER_EXEC = 0o001;
    }
}

/// Renders the nine `rwx` characters of a mode.
pub fn permission_chars(mode: u16) -> String {
    let bits = ModeBits::from_bits_truncate(mode);
    [
        (ModeBits::USER_READ, 'r'),
        (ModeBits::USER_WRITE, 'w'),
        (ModeBits::USER_EXEC, 'x'),
        (ModeBits::GROUP_READ, 'r'),
        (ModeBits::GROUP_WRITE, 'w'),
        (ModeBits::GROUP_EXEC, 'x'),
        (ModeBits::OTHER_READ, 'r'),
        (ModeBits::OTHER_WRITE, 'w'),
        (ModeBits::OTHER_EXEC, 'x'),
    ]
    .iter()
    .map(|(flag, ch)| if bits.contains(*flag) { *ch } else { '-' })
    .collect()
}

/// Status fields shared by walked files and plugin-listed items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStatus {
    pub kind: EntryKind,
    pub mode: u16,
    pub mtime: u32,
    pub uid: u16,
    pub gid: u16,
    pub size: u64,
}

impl EntryStatus {
    /// Builds status from `symlink_metadata`; returns `None` for unsupported kinds.
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        let kind = EntryKind::from_file_type(metadata.file_type())?;
        Some(Self {
            kind,
            mode: metadata.mode() as u16,
            mtime: clamp_time(metadata.mtime()),
            uid: metadata.uid() as u16,
            gid: metadata.gid() as u16,
            size: metadata.size(),
        })
    }

    /// Status of a directory created because a listing skipped it.
    pub fn placeholder_dir() -> Self {
        Self {
            kind: EntryKind::Dir,
            mode: (S_IFDIR | 0o555) as u16,
            mtime: 0,
            uid: 0,
            gid: 0,
            size: 0,
        }
    }
}

/// Clamps a signed epoch timestamp into the stored 32-bit field.
pub fn clamp_time(secs: i64) -> u32 {
    secs.clamp(0, i64::from(u32::MAX)) as u32
}

/// One catalogued object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: u32,
    pub kind: EntryKind,
    /// Raw name bytes as found on the medium.
    pub name: Vec<u8>,
    pub mode: u16,
    pub mtime: u32,
    pub uid: u16,
    pub gid: u16,
    pub size: u64,
    /// Offset into a side store, 0 when absent.
    pub info: u32,
    pub parent: u32,
    pub child: u32,
    pub next: u32,
}

impl Entry {
    /// Creates an unlinked entry under `parent`.
    pub fn new(id: u32, name: impl AsRef<[u8]>, status: &EntryStatus, parent: u32) -> Self {
        Self {
            id,
            kind: status.kind,
            name: truncate_name(name.as_ref()).to_vec(),
            mode: status.mode,
            mtime: status.mtime,
            uid: status.uid,
            gid: status.gid,
            size: status.size,
            info: 0,
            parent,
            child: NO_ENTRY,
            next: NO_ENTRY,
        }
    }

    /// The implicit root; it is never written.
    pub fn root() -> Self {
        Self::new(NO_ENTRY, "", &EntryStatus::placeholder_dir(), NO_ENTRY)
    }

    /// Overwrites status fields, keeping identity and links.
    pub fn update_status(&mut self, status: &EntryStatus) {
        self.mode = status.mode;
        self.mtime = status.mtime;
        self.uid = status.uid;
        self.gid = status.gid;
        self.size = status.size;
    }

    /// Links `child_id` as the first child if none is recorded yet.
    ///
    /// Returns true when the first-child pointer changed.
    pub fn adopt_first_child(&mut self, child_id: u32) -> bool {
        if self.child == NO_ENTRY {
            self.child = child_id;
            true
        } else {
            false
        }
    }

    /// Name for output and pattern matching; invalid UTF-8 is replaced.
    pub fn display_name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.id == NO_ENTRY
    }

    /// Type character for `ls`-style listings; archive roots with children print as directories.
    pub fn list_type_char(&self) -> char {
        match self.kind {
            EntryKind::Dir => 'd',
            EntryKind::Archive if self.child != NO_ENTRY => 'd',
            EntryKind::Symlink => 'l',
            _ => '-',
        }
    }

    /// Type character used by find output; only plain directories print as `d`.
    pub fn find_type_char(&self) -> char {
        match self.kind {
            EntryKind::Dir => 'd',
            EntryKind::Symlink => 'l',
            _ => '-',
        }
    }
}

/// Truncates a name to [`NAME_MAX`] bytes, on a character boundary when it is UTF-8.
pub fn truncate_name(name: &[u8]) -> &[u8] {
    match std::str::from_utf8(name) {
        Ok(text) => truncate_utf8(text, NAME_MAX).as_bytes(),
        Err(_) => &name[..name.len().min(NAME_MAX)],
    }
}

/// Truncates `text` to at most `max` bytes without splitting a character.
pub fn truncate_utf8(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_status(size: u64) -> EntryStatus {
        EntryStatus {
            kind: EntryKind::File,
            mode: 0o100644,
            mtime: 1_700_000_000,
            uid: 1000,
            gid: 100,
            size,
        }
    }

    #[test]
    fn kind_round_trips_through_type_byte() {
        for kind in [
            EntryKind::Dir,
            EntryKind::Archive,
            EntryKind::File,
            EntryKind::Symlink,
        ] {
            assert_eq!(EntryKind::from_u8(kind as u8), Some(kind));
        }
        assert_eq!(EntryKind::from_u8(9), None);
    }

    #[test]
    fn kind_from_mode_bits() {
        assert_eq!(EntryKind::from_mode(0o040755), EntryKind::Dir);
        assert_eq!(EntryKind::from_mode(0o120777), EntryKind::Symlink);
        assert_eq!(EntryKind::from_mode(0o100644), EntryKind::File);
    }

    #[test]
    fn permission_chars_render_all_bits() {
        assert_eq!(permission_chars(0o100755), "rwxr-xr-x");
        assert_eq!(permission_chars(0o640), "rw-r-----");
        assert_eq!(permission_chars(0), "---------");
    }

    #[test]
    fn placeholder_dir_is_read_only_directory() {
        let status = EntryStatus::placeholder_dir();
        assert_eq!(status.kind, EntryKind::Dir);
        assert_eq!(permission_chars(status.mode), "r-xr-xr-x");
        assert_eq!(status.mtime, 0);
    }

    #[test]
    fn first_child_is_only_adopted_once() {
        let mut dir = Entry::new(3, "dir", &EntryStatus::placeholder_dir(), 0);
        assert!(dir.adopt_first_child(4));
        assert!(!dir.adopt_first_child(5));
        assert_eq!(dir.child, 4);
    }

    #[test]
    fn update_status_keeps_links() {
        let mut entry = Entry::new(7, "a", &EntryStatus::placeholder_dir(), 2);
        entry.child = 8;
        entry.next = 9;
        entry.update_status(&file_status(42));
        assert_eq!(entry.size, 42);
        assert_eq!((entry.id, entry.parent, entry.child, entry.next), (7, 2, 8, 9));
    }

    #[test]
    fn archive_type_char_depends_on_children() {
        let mut archive = Entry::new(1, "a.tar", &file_status(10), 0);
        archive.kind = EntryKind::Archive;
        assert_eq!(archive.list_type_char(), '-');
        archive.child = 2;
        assert_eq!(archive.list_type_char(), 'd');
        assert_eq!(archive.find_type_char(), '-');
    }

    #[test]
    fn long_names_truncate_on_char_boundary() {
        let name = "é".repeat(200);
        let truncated = truncate_name(name.as_bytes());
        assert!(truncated.len() <= NAME_MAX);
        assert_eq!(truncated.len() % 2, 0);
    }

    #[test]
    fn non_utf8_names_keep_their_bytes() {
        let entry = Entry::new(1, b"caf\xe9.txt", &file_status(1), 0);
        assert_eq!(entry.name, b"caf\xe9.txt");
        assert_eq!(entry.display_name(), "caf\u{fffd}.txt");

        let long = vec![0xffu8; 300];
        assert_eq!(truncate_name(&long).len(), NAME_MAX);
    }

    #[test]
    fn clamp_time_handles_out_of_range() {
        assert_eq!(clamp_time(-5), 0);
        assert_eq!(clamp_time(i64::MAX), u32::MAX);
        assert_eq!(clamp_time(1234), 1234);
    }
}
