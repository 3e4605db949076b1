use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = sightline_cli::Cli::parse();
    sightline_cli::run_cli(cli)
}
