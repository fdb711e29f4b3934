use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sable")]
#[command(about = "Sable chain sync node", long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml", env = "SABLE_CONFIG")]
    pub config: PathBuf,

    /// Path to the data directory
    #[arg(short, long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the node until interrupted (default)
    Run,
    /// Print stored chain heights and exit
    Status,
}
