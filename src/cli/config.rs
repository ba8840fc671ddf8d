use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;

const DEFAULT_ALGORITHM: &str = "scrypt";
const DEFAULT_DEVICES: usize = 2;
const DEFAULT_DAG_CHUNK_ITEMS: u64 = 1024;
const MAX_DEVICES: usize = 64;

#[derive(Debug, Parser)]
#[command(name = "kdispatch")]
#[command(about = "Resolve an algorithm and bind one work item per device", long_about = None)]
pub(crate) struct Cli {
    /// Algorithm or alias name
    #[arg(short, long)]
    pub algorithm: Option<String>,

    /// Scrypt memory-cost exponent override
    #[arg(short, long)]
    pub nfactor: Option<u8>,

    /// Kernel source base name override
    #[arg(short, long)]
    pub kernel_file: Option<String>,

    /// Number of host devices to open
    #[arg(short, long)]
    pub devices: Option<usize>,

    /// DAG epoch (defaults to the epoch of --height)
    #[arg(long)]
    pub epoch: Option<u64>,

    /// Block height used for DAG sizing
    #[arg(long)]
    pub height: Option<u64>,

    /// Items per DAG generation launch
    #[arg(long)]
    pub dag_chunk_items: Option<u64>,

    /// Tracing filter directive, e.g. `debug` or `kernel_dispatch=trace`
    #[arg(long)]
    pub log_level: Option<String>,

    /// Print the descriptor as JSON and exit
    #[arg(long)]
    pub json: bool,

    /// JSON session file; explicit flags override its fields
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct SessionFile {
    pub algorithm: Option<String>,
    pub nfactor: Option<u8>,
    pub kernel_file: Option<String>,
    pub devices: Option<usize>,
    pub epoch: Option<u64>,
    pub height: Option<u64>,
    pub dag_chunk_items: Option<u64>,
    pub log_level: Option<String>,
    pub json: Option<bool>,
}

impl SessionFile {
    fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read session file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse session file {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub algorithm: String,
    pub nfactor: Option<u8>,
    pub kernel_file: Option<String>,
    pub devices: usize,
    pub epoch: Option<u64>,
    pub height: u64,
    pub dag_chunk_items: u64,
    /// Explicit filter; `RUST_LOG` applies when unset.
    pub log_level: Option<String>,
    pub json: bool,
}

impl Settings {
    pub(crate) fn load() -> Result<Self> {
        Self::from_cli(Cli::parse())
    }

    pub(crate) fn from_cli(cli: Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => SessionFile::load(path)?,
            None => SessionFile::default(),
        };
        Self::merge(cli, file)
    }

    fn merge(cli: Cli, file: SessionFile) -> Result<Self> {
        let settings = Self {
            algorithm: cli
                .algorithm
                .or(file.algorithm)
                .unwrap_or_else(|| DEFAULT_ALGORITHM.to_string()),
            nfactor: cli.nfactor.or(file.nfactor),
            kernel_file: cli.kernel_file.or(file.kernel_file),
            devices: cli.devices.or(file.devices).unwrap_or(DEFAULT_DEVICES),
            epoch: cli.epoch.or(file.epoch),
            height: cli.height.or(file.height).unwrap_or(0),
            dag_chunk_items: cli
                .dag_chunk_items
                .or(file.dag_chunk_items)
                .unwrap_or(DEFAULT_DAG_CHUNK_ITEMS),
            log_level: cli.log_level.or(file.log_level),
            json: cli.json || file.json.unwrap_or(false),
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.devices == 0 || self.devices > MAX_DEVICES {
            bail!("--devices must be between 1 and {MAX_DEVICES}");
        }
        if self.dag_chunk_items == 0 {
            bail!("--dag-chunk-items must be positive");
        }
        if self.nfactor.is_some_and(|nfactor| nfactor > 30) {
            bail!("--nfactor above 30 is not supported");
        }
        Ok(())
    }
}
