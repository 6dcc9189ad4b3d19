mod server;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use freshet_engine::{config::Config, logging};
use server::FreshetServer;

/// Freshet live-streaming origin server.
#[derive(Parser, Debug)]
#[command(name = "freshet", version, about)]
struct Args {
    /// Configuration file path.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run as a background service (no interactive console).
    #[arg(long)]
    service: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;
    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("config validation error: {error}");
        }
        anyhow::bail!("configuration validation failed with {} error(s)", errors.len());
    }

    logging::init_logging(&config.logging)?;
    info!("freshet starting (service mode: {})", args.service);

    let server = FreshetServer::new(config);
    if let Err(err) = server.start().await {
        error!("fatal init error: {err:#}");
        return Err(err);
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping");
    Ok(())
}
