use crate::config::Settings;
use anyhow::Result;
use clap::{Args, Subcommand};
use log::info;
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct ConfigCommands {
    #[command(subcommand)]
    pub command: ConfigSubcommands,
}

#[derive(Subcommand)]
pub enum ConfigSubcommands {
    /// Print the effective settings as TOML
    Show,
    /// Print where settings are read from
    Path,
    /// Write the default settings to the settings file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

/// Handle `alaraf config ...`
pub async fn config_command(args: ConfigCommands, path: Option<PathBuf>) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => Settings::default_path()?,
    };

    match args.command {
        ConfigSubcommands::Show => show(&path),
        ConfigSubcommands::Path => {
            println!("{}", path.display());
            Ok(())
        }
        ConfigSubcommands::Init { force } => init(&path, force),
    }
}

fn show(path: &Path) -> Result<()> {
    let settings = Settings::load_from(path)?;
    print!("{}", settings.to_toml()?);
    Ok(())
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("Settings file {} already exists (use --force to overwrite)", path.display());
    }

    info!("Writing default settings to {:?}", path);
    Settings::default().save_to(path)?;
    println!("Wrote default settings to {}", path.display());
    Ok(())
}
