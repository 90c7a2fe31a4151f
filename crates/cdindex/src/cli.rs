//! Command-line surface of the `cdindex` binary.

use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::warn;

use crate::builder::build_index;
use crate::capability::Registry;
use crate::config::{load_config, CatalogConfig};
use crate::migrate::{upgrade_store, UpgradeOutcome};
use crate::query::{copy_out, list_store, search_dir, write_info, FindRequest};
use crate::store::iso::capture_header;
use crate::store::{IndexReader, StorePaths};

#[derive(Parser, Debug)]
#[command(name = "cdindex")]
#[command(about = "Catalog removable media and search the catalog offline")]
#[command(version)]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, global = true, env = "CDINDEX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log debug messages
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a store from a mounted medium
    Index {
        /// Store to create (`.cdi` is appended when missing)
        store: PathBuf,

        /// Directory tree to walk
        #[arg(long)]
        source: Option<PathBuf>,

        /// Device whose volume descriptors are captured
        #[arg(long)]
        device: Option<PathBuf>,

        /// Write picture thumbnails next to the store
        #[arg(long)]
        thumbnails: bool,

        /// Location of external listing tools
        #[arg(long, env = "CDINDEX_TOOLS")]
        tools_dir: Option<PathBuf>,
    },

    /// List every entry of a store
    List { store: PathBuf },

    /// Show the header of a store
    Info { store: PathBuf },

    /// Search stores: [mask][/path] [-name|-iname|-regex|-iregex|-type|-mtime|-size ARG]... [-printf FMT] [-nodefdir] [-noarc]
    Find {
        /// Directory holding the stores
        #[arg(long, env = "CDINDEX_DIR")]
        store_dir: Option<PathBuf>,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Write the metadata report of one entry
    Copyout {
        store: PathBuf,
        /// Slash-separated path inside the store
        entry: String,
        output: PathBuf,
    },

    /// Upgrade a legacy store to the current format
    Upgrade { store: PathBuf },
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;
        match self.command {
            Commands::Index {
                store,
                source,
                device,
                thumbnails,
                tools_dir,
            } => {
                let config = CatalogConfig {
                    source: source.unwrap_or(config.source),
                    device: device.unwrap_or(config.device),
                    tools_dir: tools_dir.unwrap_or(config.tools_dir),
                    thumbnails: thumbnails || config.thumbnails,
                    ..config
                };
                cmd_index(&store, &config)
            }
            Commands::List { store } => {
                let reader = open_store(&store)?;
                let mut out = BufWriter::new(io::stdout().lock());
                list_store(&reader, &mut out)?;
                out.flush()?;
                Ok(())
            }
            Commands::Info { store } => {
                let reader = open_store(&store)?;
                let mut out = BufWriter::new(io::stdout().lock());
                write_info(&reader, &mut out)?;
                out.flush()?;
                Ok(())
            }
            Commands::Find { store_dir, args } => {
                let request = FindRequest::parse_args(&args)?;
                let dir = if request.no_default_dir {
                    PathBuf::from("./")
                } else {
                    store_dir.unwrap_or(config.store_dir)
                };
                let mut out = BufWriter::new(io::stdout().lock());
                search_dir(&dir, &request, &mut out)
                    .with_context(|| format!("cannot search {}", dir.display()))?;
                out.flush()?;
                Ok(())
            }
            Commands::Copyout {
                store,
                entry,
                output,
            } => {
                let reader = open_store(&store)?;
                let registry = Registry::with_defaults(&config);
                copy_out(&reader, &registry, &entry, &output)
                    .with_context(|| format!("cannot copy out {entry}"))?;
                Ok(())
            }
            Commands::Upgrade { store } => cmd_upgrade(&store),
        }
    }
}

fn open_store(store: &Path) -> Result<IndexReader> {
    let paths = StorePaths::new(store);
    let index = paths.index().display().to_string();
    IndexReader::open(paths).with_context(|| format!("cannot open {index}"))
}

fn cmd_index(store: &Path, config: &CatalogConfig) -> Result<()> {
    let paths = StorePaths::new(store);
    let header = capture_header(&config.device);
    let registry = Registry::with_defaults(config);
    let report = build_index(&paths, &config.source, &header, &registry)
        .with_context(|| format!("cannot index {}", config.source.display()))?;
    if report.partial > 0 || report.unresolved > 0 {
        warn!(
            "{} containers indexed with errors, {} entries without a parent",
            report.partial, report.unresolved
        );
    }
    Ok(())
}

fn cmd_upgrade(store: &Path) -> Result<()> {
    let paths = StorePaths::new(store);
    let index = paths.index().to_path_buf();
    let outcome =
        upgrade_store(&index).with_context(|| format!("cannot upgrade {}", index.display()))?;

    let mut out = io::stdout().lock();
    match outcome {
        UpgradeOutcome::UpToDate => writeln!(out, "{} is up to date", index.display())?,
        UpgradeOutcome::ToolOutdated(version) => warn!(
            "{} has version {version}, this tool is outdated",
            index.display()
        ),
        UpgradeOutcome::Upgraded(stats) => {
            writeln!(out, "{} upgraded, backup in {}", index.display(), stats.backup.display())?;
            writeln!(out, "Files:         {} ({} bytes)", stats.files, stats.data_size)?;
            writeln!(out, "Images:        {}", stats.images)?;
            writeln!(out, "Raw images:    {}", stats.raw_images)?;
            writeln!(out, "Videos:        {}", stats.videos)?;
            writeln!(out, "Invalid sizes: {}", stats.invalid_sizes)?;
            writeln!(out, "Store size:    {} -> {} bytes", stats.old_size, stats.new_size)?;
        }
    }
    Ok(())
}
