use super::commands::{ConfigCommands, SimulateArgs};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "alaraf")]
#[command(about = "Inspect and exercise the Al-Araf resilience layer")]
pub struct Cli {
    /// Settings file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Settings file inspection
    Config(ConfigCommands),
    /// Run a simulated flaky operation through the retry executor
    Simulate(SimulateArgs),
}
