//! podxd - podx data exchange daemon
//!
//! Runs either a seller that serves a response file to authenticated buyers,
//! or a buyer that performs one exchange against a seller.

use clap::Parser;
use podx_core::Role;
use podxd::client;
use podxd::config::Config;
use podxd::server::Server;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "podxd=info,podx_net=info";

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration
    let config = Config::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    info!("podxd v{} - podx exchange daemon", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {:#}", e);
        return ExitCode::FAILURE;
    }

    let result = match config.role {
        Role::Seller => run_seller(&config).await,
        Role::Buyer => run_buyer(&config).await,
    };
    if let Err(e) = result {
        error!("{:#}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn run_seller(config: &Config) -> anyhow::Result<()> {
    let keypair = Arc::new(config.keypair()?);
    let server = Server::bind(config.offer()?, keypair).await?;
    info!("Seller identity {}", server.local_address().identity);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
    }
    Ok(())
}

async fn run_buyer(config: &Config) -> anyhow::Result<()> {
    let keypair = Arc::new(config.keypair()?);
    info!("Buyer identity {}", keypair.identity());

    let summary = client::purchase(&config.purchase()?, keypair).await?;
    info!(
        "Session {:#018x} complete: sent {} bytes, received {} bytes",
        summary.session.id, summary.request_len, summary.response_len
    );
    Ok(())
}
