//! The `-printf` format language.
//!
//! Backslash escapes and `%` directives are resolved once when the format
//! is parsed; rendering only walks the resulting segments.

use std::io::Write;

use chrono::format::{Item, StrftimeItems};
use chrono::{Local, TimeZone};

use crate::capability::asctime;
use crate::error::Result;
use crate::owner::OwnerNames;
use crate::path::PathStack;
use crate::store::IndexReader;
use crate::types::{permission_chars, Entry, EntryKind};

/// Symlink target lookup used by `%l`.
pub trait LinkTargets {
    fn link_target(&self, entry: &Entry) -> Result<Option<String>>;
}

impl LinkTargets for IndexReader {
    fn link_target(&self, entry: &Entry) -> Result<Option<String>> {
        self.read_symlink(entry)
    }
}

/// One matched entry and where it was found.
pub struct MatchContext<'a> {
    pub label: &'a str,
    /// Start path of the search, `None` for the store root.
    pub start: Option<&'a str>,
    /// Entries between the start path and `entry`.
    pub stack: &'a PathStack,
    pub entry: &'a Entry,
    pub links: &'a dyn LinkTargets,
}

impl MatchContext<'_> {
    /// Path of the directory holding the entry.
    pub fn dir_path(&self) -> String {
        let below = self.stack.join();
        match self.start {
            Some(start) if below.is_empty() => start.to_string(),
            Some(start) => format!("{start}/{below}"),
            None => below,
        }
    }

    pub fn path(&self) -> String {
        let dir = self.dir_path();
        if dir.is_empty() {
            self.entry.display_name().into_owned()
        } else {
            format!("{dir}/{}", self.entry.display_name())
        }
    }

    pub fn depth(&self) -> usize {
        let start = self
            .start
            .map(|start| start.split('/').filter(|c| !c.is_empty()).count())
            .unwrap_or(0);
        1 + start + self.stack.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(Vec<u8>),
    Directive(char),
    /// `%T` followed by `@` or a strftime conversion character.
    Time(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    segments: Vec<Segment>,
}

fn is_octal(c: char) -> bool {
    ('0'..='7').contains(&c)
}

fn octal_value(c: char) -> u32 {
    c as u32 - '0' as u32
}

fn push_char(literal: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    literal.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

impl OutputFormat {
    pub fn parse(format: &str) -> Self {
        let chars: Vec<char> = format.chars().collect();
        let mut segments = Vec::new();
        let mut literal = Vec::new();

        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            i += 1;
            match c {
                '\\' => {
                    let Some(&next) = chars.get(i) else {
                        break;
                    };
                    i += 1;
                    match next {
                        'a' => literal.push(0x07),
                        'b' => literal.push(0x08),
                        'f' => literal.push(0x0c),
                        'n' => literal.push(b'\n'),
                        'r' => literal.push(b'\r'),
                        't' => literal.push(b'\t'),
                        'v' => literal.push(0x0b),
                        '\\' => literal.push(b'\\'),
                        d if is_octal(d)
                            && chars.get(i).copied().is_some_and(is_octal)
                            && chars.get(i + 1).copied().is_some_and(is_octal) =>
                        {
                            let value = (octal_value(d) << 6)
                                | (octal_value(chars[i]) << 3)
                                | octal_value(chars[i + 1]);
                            literal.push(value as u8);
                            i += 2;
                        }
                        other => {
                            literal.push(b'\\');
                            push_char(&mut literal, other);
                        }
                    }
                }
                '%' => {
                    let Some(&next) = chars.get(i) else {
                        break;
                    };
                    i += 1;
                    let segment = match next {
                        '%' => {
                            literal.push(b'%');
                            continue;
                        }
                        'T' => {
                            let Some(&spec) = chars.get(i) else {
                                break;
                            };
                            i += 1;
                            Segment::Time(spec)
                        }
                        'b' | 'd' | 'f' | 'g' | 'G' | 'h' | 'k' | 'l' | 'm' | 'M' | 'p' | 's'
                        | 't' | 'u' | 'U' | 'y' | 'L' => Segment::Directive(next),
                        other => {
                            push_char(&mut literal, other);
                            continue;
                        }
                    };
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment);
                }
                other => push_char(&mut literal, other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Self { segments }
    }

    pub fn render(
        &self,
        ctx: &MatchContext<'_>,
        owners: &mut OwnerNames,
        out: &mut dyn Write,
    ) -> Result<()> {
        let entry = ctx.entry;
        for segment in &self.segments {
            match segment {
                Segment::Literal(bytes) => out.write_all(bytes)?,
                Segment::Time('@') => write!(out, "{}", entry.mtime)?,
                Segment::Time(spec) => write!(out, "{}", strftime(*spec, entry.mtime))?,
                Segment::Directive(directive) => match directive {
                    'b' => write!(out, "{}", entry.size / 512)?,
                    'd' => write!(out, "{}", ctx.depth())?,
                    'f' => write!(out, "{}", entry.display_name())?,
                    'g' => write!(out, "{}", owners.group(entry.gid))?,
                    'G' => write!(out, "{}", entry.gid)?,
                    'h' => write!(out, "{}", ctx.dir_path())?,
                    'k' => write!(out, "{}", entry.size / 1024)?,
                    'l' => {
                        if entry.kind == EntryKind::Symlink {
                            if let Some(target) = ctx.links.link_target(entry)? {
                                write!(out, "{target}")?;
                            }
                        }
                    }
                    'm' => write!(out, "{:04o}", entry.mode & 0o777)?,
                    'M' => write!(
                        out,
                        "{}{}",
                        entry.find_type_char(),
                        permission_chars(entry.mode)
                    )?,
                    'p' => write!(out, "{}", ctx.path())?,
                    's' => write!(out, "{}", entry.size)?,
                    't' => write!(out, "{}", asctime(entry.mtime))?,
                    'u' => write!(out, "{}", owners.user(entry.uid))?,
                    'U' => write!(out, "{}", entry.uid)?,
                    'y' => write!(out, "{}", entry.find_type_char())?,
                    'L' => write!(out, "{}", ctx.label)?,
                    other => write!(out, "{other}")?,
                },
            }
        }
        Ok(())
    }
}

/// Formats `secs` with the single strftime conversion `%spec`; unknown conversions print nothing.
fn strftime(spec: char, secs: u32) -> String {
    let Some(time) = Local.timestamp_opt(i64::from(secs), 0).single() else {
        return String::new();
    };
    let pattern = format!("%{spec}");
    let items: Vec<Item<'_>> = StrftimeItems::new(&pattern).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return String::new();
    }
    time.format_with_items(items.iter()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntryStatus;

    struct Links;

    impl LinkTargets for Links {
        fn link_target(&self, _entry: &Entry) -> Result<Option<String>> {
            Ok(Some("../target".to_string()))
        }
    }

    fn song() -> Entry {
        let status = EntryStatus {
            kind: EntryKind::File,
            mode: 0o100640,
            mtime: 1_234_567_890,
            uid: 54321,
            gid: 54322,
            size: 5000,
        };
        Entry::new(7, "song.txt", &status, 3)
    }

    fn render(format: &str, entry: &Entry, start: Option<&str>, stack: &PathStack) -> String {
        let ctx = MatchContext {
            label: "disc",
            start,
            stack,
            entry,
            links: &Links,
        };
        let mut out = Vec::new();
        OutputFormat::parse(format)
            .render(&ctx, &mut OwnerNames::new(), &mut out)
            .expect("render");
        String::from_utf8_lossy(&out).into_owned()
    }

    fn nested() -> PathStack {
        let mut stack = PathStack::new();
        stack.push(2, "music");
        stack.push(3, "rock");
        stack
    }

    #[test]
    fn escapes_are_resolved() {
        let entry = song();
        let stack = PathStack::new();
        assert_eq!(render("a\\tb\\n", &entry, None, &stack), "a\tb\n");
        assert_eq!(render("\\101\\102", &entry, None, &stack), "AB");
        assert_eq!(render("\\a\\b\\f\\r\\v\\\\", &entry, None, &stack), "\x07\x08\x0c\r\x0b\\");
        assert_eq!(render("\\q\\18", &entry, None, &stack), "\\q\\18");
        assert_eq!(render("end\\", &entry, None, &stack), "end");
        assert_eq!(render("end%", &entry, None, &stack), "end");
    }

    #[test]
    fn path_directives_include_start_and_stack() {
        let entry = song();
        let stack = nested();
        assert_eq!(
            render("%p|%h|%f|%d", &entry, Some("cd/audio"), &stack),
            "cd/audio/music/rock/song.txt|cd/audio/music/rock|song.txt|5"
        );
        assert_eq!(render("%p|%d", &entry, None, &PathStack::new()), "song.txt|1");
        assert_eq!(render("[%h]", &entry, None, &PathStack::new()), "[]");
    }

    #[test]
    fn numeric_and_mode_directives() {
        let entry = song();
        let stack = PathStack::new();
        assert_eq!(render("%s %b %k", &entry, None, &stack), "5000 9 4");
        assert_eq!(render("%m %M %y", &entry, None, &stack), "0640 -rw-r----- -");
        assert_eq!(render("%U:%G %L", &entry, None, &stack), "54321:54322 disc");
        assert_eq!(render("%u", &entry, None, &stack), "54321");
        assert_eq!(render("%% %z", &entry, None, &stack), "% z");
    }

    #[test]
    fn time_directives() {
        let entry = song();
        let stack = PathStack::new();
        assert_eq!(render("%T@", &entry, None, &stack), "1234567890");
        assert_eq!(render("[%T!]", &entry, None, &stack), "[]");
        assert_eq!(render("%TY", &entry, None, &stack), "2009");
        assert!(render("%t", &entry, None, &stack).ends_with("2009"));
        assert_eq!(render("%T", &entry, None, &stack), "");
    }

    #[test]
    fn symlink_targets_only_for_links() {
        let stack = PathStack::new();
        assert_eq!(render("[%l]", &song(), None, &stack), "[]");

        let mut link = song();
        link.kind = EntryKind::Symlink;
        link.mode = 0o120777;
        assert_eq!(render("%y %l", &link, None, &stack), "l ../target");
        assert_eq!(render("%M", &link, None, &stack), "lrwxrwxrwx");
    }
}
