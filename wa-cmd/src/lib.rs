//! Command implementations for the water accounting CLI.
//!
//! `run` drives the basin pipeline from a JSON run configuration. The other
//! subcommands inspect and prepare inputs, roll up existing accounts and
//! manage checkpoints.

use clap::Subcommand;
use std::path::PathBuf;
use wa_core::geotiff::GeoTiffAdapter;

pub mod checkpoints;
pub mod config;
pub mod engine;
pub mod monthly;
pub mod pipeline;
pub mod rollup;
pub mod scan;
pub mod stage;

pub use config::{BasinConfig, RunConfig};
pub use engine::{Engine, HyperloopEngine};
pub use pipeline::{BatchReport, Pipeline};
pub use stage::Stage;

#[derive(Subcommand)]
pub enum Command {
    /// Run the accounting pipeline for every basin of a configuration file
    Run {
        /// JSON run configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Override the configured output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Run only these stages; the others load their checkpoints
        #[arg(long, value_enum, value_delimiter = ',')]
        stages: Vec<Stage>,
    },

    /// List the monthly series found in a raster folder
    Scan {
        folder: PathBuf,

        #[arg(long, default_value = "tif")]
        extension: String,

        /// Use the first date candidate when a file name has several
        #[arg(long)]
        lenient: bool,
    },

    /// Aggregate daily, 8-day or 16-day rasters into monthly rasters
    Monthly {
        folder: PathBuf,

        #[arg(short, long)]
        output_dir: PathBuf,

        /// File name prefix of the monthly rasters; defaults to the folder name
        #[arg(short, long)]
        prefix: Option<String>,

        #[arg(long, default_value = "tif")]
        extension: String,

        /// Use the first date candidate when a file name has several
        #[arg(long)]
        lenient: bool,
    },

    /// Sum monthly account tables of one sheet into water-year tables
    Rollup {
        /// Folder of `<sheet>_YYYY_MM.csv` tables
        folder: PathBuf,

        #[arg(short, long)]
        sheet: String,

        /// First month of the water year
        #[arg(long, default_value_t = 1)]
        start_month: u32,

        /// Defaults to the parent of the monthly folder
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// List stored checkpoints, or remove one
    Checkpoints {
        /// Checkpoint database
        db: PathBuf,

        #[arg(short, long)]
        basin: Option<String>,

        /// Stage whose checkpoint to delete (needs --basin)
        #[arg(long)]
        remove: Option<String>,
    },
}

pub fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Run {
            config,
            output_dir,
            stages,
        } => engine::run_config(&config, output_dir, &stages),
        Command::Scan {
            folder,
            extension,
            lenient,
        } => scan::run_scan(&folder, &extension, lenient),
        Command::Monthly {
            folder,
            output_dir,
            prefix,
            extension,
            lenient,
        } => monthly::run_monthly(
            &GeoTiffAdapter,
            &folder,
            &output_dir,
            prefix.as_deref(),
            &extension,
            lenient,
        )
        .map(|_| ()),
        Command::Rollup {
            folder,
            sheet,
            start_month,
            output_dir,
        } => rollup::run_rollup(&folder, &sheet, start_month, output_dir).map(|_| ()),
        Command::Checkpoints { db, basin, remove } => {
            checkpoints::run_checkpoints(&db, basin.as_deref(), remove.as_deref())
        }
    }
}
