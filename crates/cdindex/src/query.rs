//! Read-side operations over a built store.
//!
//! - `list`: flat dump of every record with reconstructed paths
//! - `info`: header report
//! - `find`: predicate search across the stores of a directory
//! - `copyout`: metadata report of one file through its dumper

mod copyout;
mod find;
mod format;
mod info;
mod list;
mod predicate;

pub use copyout::copy_out;
pub use find::{find_in_store, matching_stores, search_dir, FindRequest};
pub use format::{LinkTargets, MatchContext, OutputFormat};
pub use info::write_info;
pub use list::list_store;
pub use predicate::{local_midnight, Comparison, Predicate};
