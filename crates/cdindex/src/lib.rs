//! Offline catalog of removable media.
//!
//! This crate provides:
//! - A flat binary store of linked entry records with append-only side stores
//! - A builder that walks a mounted tree and descends into containers
//! - Metadata capabilities for audio, pictures and video
//! - List, info, find and copyout queries over built stores
//! - Upgrade of legacy stores

pub mod builder;
pub mod capability;
pub mod cli;
pub mod config;
pub mod error;
pub mod migrate;
pub mod owner;
pub mod path;
pub mod query;
pub mod store;
pub mod types;

// Re-export main types
pub use builder::{build_index, BuildReport};
pub use capability::Registry;
pub use config::{load_config, CatalogConfig};
pub use error::{CatalogError, Result};
pub use query::{FindRequest, OutputFormat, Predicate};
pub use store::{IndexHeader, IndexReader, IndexWriter, StorePaths};
pub use types::{Entry, EntryKind, EntryStatus};
