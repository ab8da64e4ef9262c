use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use smppgw::config::Config;
use smppgw::gateway::Gateway;
use smppgw::telemetry::{init_tracing, TracingConfig};

#[derive(Parser, Debug)]
#[command(name = "smppgw")]
#[command(author, version, about = "SMPP gateway: ESME termination and upstream routing")]
struct Args {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Validate config and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;

    init_tracing(&TracingConfig {
        log_level: config.telemetry.log_level.clone(),
        json_logs: config.telemetry.json_logs,
    })?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "starting smppgw"
    );

    info!(
        address = %config.server.address,
        routes = config.routes.len(),
        clients = config.clients.len(),
        profiles = config.retry_profiles.len(),
        "configuration loaded"
    );

    if args.validate {
        info!("configuration is valid");
        return Ok(());
    }

    Gateway::new(config)?.run().await
}
