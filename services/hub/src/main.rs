use std::path::PathBuf;

use clap::Parser;
use hub::config::{load_config, load_config_from_path};
use tracing_subscriber::EnvFilter;

/// Hub server: connection table, directory/subscription routing, and
/// Hub-to-Hub tunnels (spec §4.6, §4.8).
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the TOML config file; defaults to /etc/overlay/hub.toml.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = match args.config {
        Some(path) => load_config_from_path(&path)?,
        None => load_config()?,
    };

    hub::run_hub(config).await?;
    Ok(())
}
