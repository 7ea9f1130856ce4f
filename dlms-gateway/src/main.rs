mod config;

use crate::config::GatewayConfig;
use anyhow::{Context, Result};
use clap::Parser;
use dlms_server::{LogTelemetrySink, ServerListener};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Accepts DLMS/COSEM meters dialing in over TCP", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "DLMS_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Bind host, overrides the configuration file
    #[arg(long)]
    host: Option<String>,

    /// Bind port, overrides the configuration file
    #[arg(short, long)]
    port: Option<u16>,

    /// Close connections idle for this many seconds
    #[arg(long)]
    inactivity_secs: Option<u64>,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn gateway_config(&self) -> Result<GatewayConfig> {
        let mut config = match &self.config {
            Some(path) => GatewayConfig::load(path)?,
            None => GatewayConfig::default(),
        };
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(secs) = self.inactivity_secs {
            config.server.inactivity_timeout = secs;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_level.as_str())).init();

    let config = args.gateway_config()?;
    if config.meters.is_empty() {
        log::warn!("no meters configured, dialing meters will not be identified");
    }
    log::info!("{} meters configured", config.meters.len());

    let listener = ServerListener::new(
        config.server.clone(),
        Arc::new(config.directory()),
        Arc::new(LogTelemetrySink),
    );

    listener
        .run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                log::error!("failed to listen for Ctrl-C: {}", err);
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("Gateway listener failed")?;

    log::info!("gateway stopped");
    Ok(())
}
