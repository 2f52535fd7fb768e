//! Command-line surface.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "gitmirror",
    version,
    about = "Synchronize Git repositories between private sources and public mirrors",
    after_help = "Examples:\n  gitmirror --config config.yaml\n  gitmirror --config config.yaml --force-full -v"
)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, value_name = "PATH")]
    pub config: PathBuf,

    /// Force a full sync for every branch of every repository
    #[arg(long)]
    pub force_full: bool,

    /// Verbose output: debug logging plus git's own stdout
    #[arg(short, long)]
    pub verbose: bool,
}
