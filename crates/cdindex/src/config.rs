use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CatalogError, Result};

pub const DEFAULT_STORE_DIR: &str = "/var/lib/cdindex";
pub const DEFAULT_TOOLS_DIR: &str = "/usr/share/cdindex/tools";
pub const DEFAULT_DEVICE: &str = "/dev/cdrom";
pub const DEFAULT_SOURCE: &str = "/media/cdrom";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Directory scanned by `find` unless `-nodefdir` is given.
    pub store_dir: PathBuf,
    /// Location of the external listing tools.
    pub tools_dir: PathBuf,
    /// Device whose volume descriptors are captured into the header.
    pub device: PathBuf,
    /// Mounted tree walked by `index`.
    pub source: PathBuf,
    pub thumbnails: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            tools_dir: PathBuf::from(DEFAULT_TOOLS_DIR),
            device: PathBuf::from(DEFAULT_DEVICE),
            source: PathBuf::from(DEFAULT_SOURCE),
            thumbnails: false,
        }
    }
}

/// Loads configuration from `path`, or the defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<CatalogConfig> {
    let Some(path) = path else {
        return Ok(CatalogConfig::default());
    };

    let data = std::fs::read_to_string(path).map_err(|error| {
        CatalogError::Config(format!(
            "failed to read config {}: {error}",
            path.display()
        ))
    })?;
    serde_json::from_str(&data).map_err(|error| {
        CatalogError::Config(format!(
            "failed to parse config {}: {error}",
            path.display()
        ))
    })
}
