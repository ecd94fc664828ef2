use std::net::SocketAddr;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use bolt_runtime::RuntimeConfig;
use runtime_api::{build_state, serve};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RuntimeConfig::from_env().context("invalid runtime configuration")?;
    let bind_addr: SocketAddr = std::env::var("RUNTIME_BIND_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:4200".to_string())
        .parse()
        .context("invalid RUNTIME_BIND_ADDR")?;

    let state = build_state(config)?;
    serve(bind_addr, state).await
}
