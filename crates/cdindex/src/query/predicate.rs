//! Find predicates.
//!
//! Every predicate tests one entry field. A request holds a list of them and
//! an entry matches only when all of them do. Name patterns are compiled on
//! their first match attempt; one that does not compile is reported once and
//! never matches.

use chrono::{Local, TimeZone};
use glob::{MatchOptions, Pattern};
use log::warn;
use once_cell::unsync::OnceCell;
use regex::{Regex, RegexBuilder};

use crate::error::{CatalogError, Result};
use crate::types::{Entry, EntryKind};

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    Less,
    Greater,
}

impl Comparison {
    /// Splits a leading `-` or `+` off `raw`.
    fn split_sign(raw: &str) -> (Self, &str) {
        if let Some(rest) = raw.strip_prefix('-') {
            (Self::Less, rest)
        } else if let Some(rest) = raw.strip_prefix('+') {
            (Self::Greater, rest)
        } else {
            (Self::Equal, raw)
        }
    }

    /// Compares strictly: `Less` means `value < limit`.
    pub fn matches<T: Ord>(self, value: T, limit: T) -> bool {
        match self {
            Self::Equal => value == limit,
            Self::Less => value < limit,
            Self::Greater => value > limit,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Predicate {
    Wildcard {
        pattern: String,
        case_insensitive: bool,
        compiled: OnceCell<Option<Pattern>>,
    },
    Regex {
        pattern: String,
        case_insensitive: bool,
        compiled: OnceCell<Option<Regex>>,
    },
    Kind(EntryKind),
    /// `boundary` is a local midnight; entries compare by the midnight of their day.
    Mtime {
        boundary: i64,
        cmp: Comparison,
    },
    Size {
        bytes: u64,
        cmp: Comparison,
    },
}

fn invalid_argument(value: &str, option: &str) -> CatalogError {
    CatalogError::QueryParse(format!("invalid argument `{value}' to `{option}'"))
}

impl Predicate {
    /// Names accepted after a dash.
    pub const NAMES: [&'static str; 7] = ["name", "iname", "regex", "iregex", "type", "mtime", "size"];

    /// Builds the predicate `-name value`, where `name` is given without its dash.
    pub fn parse(name: &str, value: &str) -> Result<Self> {
        Self::parse_at(name, value, Local::now().timestamp())
    }

    /// Like [`Predicate::parse`], with `-mtime` days counted back from `now`.
    pub fn parse_at(name: &str, value: &str, now: i64) -> Result<Self> {
        let option = format!("-{name}");
        match name {
            "name" | "iname" => Ok(Self::Wildcard {
                pattern: value.to_string(),
                case_insensitive: name == "iname",
                compiled: OnceCell::new(),
            }),
            "regex" | "iregex" => Ok(Self::Regex {
                pattern: value.to_string(),
                case_insensitive: name == "iregex",
                compiled: OnceCell::new(),
            }),
            "type" => match value {
                "d" => Ok(Self::Kind(EntryKind::Dir)),
                "f" => Ok(Self::Kind(EntryKind::File)),
                "l" => Ok(Self::Kind(EntryKind::Symlink)),
                "a" => Ok(Self::Kind(EntryKind::Archive)),
                _ => Err(invalid_argument(value, &option)),
            },
            "mtime" => {
                let (cmp, digits) = Comparison::split_sign(value);
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid_argument(value, &option));
                }
                let days: u32 = digits.parse().map_err(|_| invalid_argument(value, &option))?;
                let boundary = local_midnight(now - i64::from(days) * SECONDS_PER_DAY);
                Ok(Self::Mtime { boundary, cmp })
            }
            "size" => {
                let (cmp, rest) = Comparison::split_sign(value);
                let bytes = parse_size(rest).ok_or_else(|| invalid_argument(value, &option))?;
                Ok(Self::Size { bytes, cmp })
            }
            _ => Err(CatalogError::QueryParse(format!("invalid predicate `{option}'"))),
        }
    }

    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            Self::Wildcard {
                pattern,
                case_insensitive,
                compiled,
            } => {
                let compiled = compiled.get_or_init(|| {
                    Pattern::new(pattern)
                        .map_err(|err| warn!("invalid wildcard `{pattern}': {err}"))
                        .ok()
                });
                compiled.as_ref().is_some_and(|glob| {
                    glob.matches_with(
                        &entry.display_name(),
                        MatchOptions {
                            case_sensitive: !case_insensitive,
                            require_literal_separator: true,
                            require_literal_leading_dot: false,
                        },
                    )
                })
            }
            Self::Regex {
                pattern,
                case_insensitive,
                compiled,
            } => {
                let compiled = compiled.get_or_init(|| {
                    RegexBuilder::new(pattern)
                        .case_insensitive(*case_insensitive)
                        .build()
                        .map_err(|err| warn!("invalid regex `{pattern}': {err}"))
                        .ok()
                });
                compiled
                    .as_ref()
                    .is_some_and(|regex| regex.is_match(&entry.display_name()))
            }
            Self::Kind(kind) => entry.kind == *kind,
            Self::Mtime { boundary, cmp } => {
                cmp.matches(*boundary, local_midnight(i64::from(entry.mtime)))
            }
            Self::Size { bytes, cmp } => cmp.matches(entry.size, *bytes),
        }
    }
}

/// Parses `N[bwkMGc]`; a bare number counts 512-byte blocks.
fn parse_size(raw: &str) -> Option<u64> {
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    if digits.is_empty() {
        return None;
    }
    let number: u64 = digits.parse().ok()?;
    let factor = match unit {
        "" | "b" => 512,
        "c" => 1,
        "w" => 2,
        "k" => 1024,
        "M" => 1024 * 1024,
        "G" => 1024 * 1024 * 1024,
        _ => return None,
    };
    number.checked_mul(factor)
}

/// Start of the local day containing `secs`.
pub fn local_midnight(secs: i64) -> i64 {
    Local
        .timestamp_opt(secs, 0)
        .single()
        .and_then(|dt| dt.date_naive().and_hms_opt(0, 0, 0))
        .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
        .map(|dt| dt.timestamp())
        .unwrap_or(secs - secs.rem_euclid(SECONDS_PER_DAY))
}
