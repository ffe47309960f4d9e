use clap::{Parser, Subcommand};
use std::path::PathBuf;

use options_tracker::config::RunMode;
use options_tracker::quotes::SourceKind;

/// Daily mark-to-market tracker for a fixed set of option positions.
#[derive(Parser)]
#[command(name = "options-tracker", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Fetch delayed quotes, price every position and record today's rows
    Run {
        /// Path to the position file
        #[arg(long, default_value = "config/options.json")]
        positions: PathBuf,

        /// Directory holding history.csv, portfolio.csv and last_run.txt
        #[arg(long, default_value = "docs/data")]
        data_dir: PathBuf,

        /// Quote provider
        #[arg(long, value_enum, default_value = "yahoo")]
        source: SourceKind,

        /// Retry and pacing preset (fast for interactive use, careful for schedulers)
        #[arg(long, value_enum, default_value = "fast")]
        mode: RunMode,

        /// Skip the random start-up delay even in careful mode
        #[arg(long)]
        no_stagger: bool,
    },

    /// Print the latest totals, weekly return change and top positions
    Summary {
        /// Directory holding history.csv and portfolio.csv
        #[arg(long, default_value = "docs/data")]
        data_dir: PathBuf,

        /// Number of positions to list
        #[arg(long, default_value = "12")]
        top: usize,
    },
}
