// Command line arguments

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "certstream-server",
    about = "Real-time Certificate Transparency log aggregator and broadcast server",
    disable_version_flag = true
)]
pub struct Args {
    /// Path to the config file
    #[arg(long, default_value = "config.yml")]
    pub config: PathBuf,

    /// Print the version and exit
    #[arg(long)]
    pub version: bool,

    /// Fetch the current STH for every log, write the checkpoint file and exit
    #[arg(long)]
    pub create_index_file: bool,
}
