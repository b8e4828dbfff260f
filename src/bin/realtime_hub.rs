use std::path::PathBuf;

use clap::Parser;
use realtime_channel::server::{HubConfig, HubError, HubServer};
use realtime_channel::telemetry::init_tracing;
use tracing::{error, info};

/// Realtime hub serving topic events and notification snapshots over websockets.
#[derive(Debug, Parser)]
#[command(name = "realtime-hub", version)]
struct Cli {
    /// JSON config file; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn hub_config(&self) -> Result<HubConfig, HubError> {
        let mut config = match &self.config {
            Some(path) => HubConfig::from_json_file(path)?,
            None => HubConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = cli.hub_config()?;
    info!(?config, "starting realtime hub");
    let server = HubServer::new(config);
    let listener = server.bind().await?;

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
    };
    server.serve(listener, shutdown).await?;
    Ok(())
}
