use alaraf_resilience::cli::{Cli, Commands, commands};
use alaraf_resilience::config::Settings;
use anyhow::{Context, Result};
use clap::Parser;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_logging(&cli)?;
    info!("Starting alaraf");

    match cli.command {
        Commands::Config(args) => commands::config_command(args, cli.config).await?,
        Commands::Simulate(args) => commands::simulate_command(args, cli.config).await?,
    }

    Ok(())
}

/// Log to stderr, or to the file named in the settings (truncated on each run)
fn init_logging(cli: &Cli) -> Result<()> {
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .unwrap_or_default();

    let mut builder = env_logger::Builder::from_default_env();
    if let Some(path) = settings.logging.file {
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file: {:?}", path))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.init();
    Ok(())
}
