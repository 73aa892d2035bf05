use std::path::PathBuf;

use clap::Parser;
use endpoint::config::{load_config, load_config_from_path};
use tracing_subscriber::EnvFilter;

/// Endpoint client: registers its configured services with a Hub and
/// relays whatever arrives on them (spec §4.7).
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the TOML config file; defaults to /etc/overlay/endpoint.toml.
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

    let client_services = config.client_services.clone();
    let mut endpoint = endpoint::Endpoint::spawn(config);
    tracing::info!(uid = %endpoint.local_uid(), "endpoint starting");

    for service in &client_services {
        match endpoint.add_service(service.name.clone(), service.kind, service.locality, true) {
            Ok(port) => tracing::info!(path = %service.name, port, "service registered"),
            Err(e) => tracing::warn!(error = %e, path = %service.name, "failed to register configured service"),
        }
    }

    while let Some(msg) = endpoint.recv().await {
        tracing::debug!(port = msg.port, source = %msg.source_uid, bytes = msg.payload.len(), "message received");
    }

    Ok(())
}
