use anyhow::Context;
use clap::Parser;

use options_tracker::config::TrackerConfig;
use options_tracker::{logging, run, summary};

mod cli;

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    logging::init_logging();

    match cli.command {
        cli::Command::Run {
            positions,
            data_dir,
            source,
            mode,
            no_stagger,
        } => {
            let config = TrackerConfig::from_cli(positions, data_dir, source, mode, no_stagger)
                .context("resolving configuration")?;
            run::run(&config)
        }
        cli::Command::Summary { data_dir, top } => summary::run(&data_dir, top),
    }
}
