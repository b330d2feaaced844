pub mod config;
pub mod simulate;

pub use config::{ConfigCommands, ConfigSubcommands, config_command};
pub use simulate::{SimulateArgs, simulate_command};
