mod bootstrap_helpers;
mod server_runtime;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use wolf_cli::Cli;
use wolf_keys::KeyRegistry;
use wolf_startup::build_service_context;

use crate::bootstrap_helpers::{init_tracing, shutdown_signal};
use crate::server_runtime::run_service;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli
        .into_service_config()
        .context("invalid service configuration")?;
    let keys = KeyRegistry::from_environment(cli.key_seed());

    let bind_addr = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid --bind '{}'", config.bind))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind wolf server on {bind_addr}"))?;
    let context = Arc::new(build_service_context(&config, keys)?);

    run_service(context, listener, shutdown_signal()).await
}
