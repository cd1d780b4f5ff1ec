//! WA CLI - basin water accounting from monthly raster series.

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "wa-cli",
    version,
    about = "Water Accounting Plus sheet pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: wa_cmd::Command,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    log::debug!("wa-cli {}", env!("CARGO_PKG_VERSION"));
    wa_cmd::run(cli.command)
}
