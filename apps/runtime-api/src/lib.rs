//! HTTP surface for the Bolt runtime session control plane.
//!
//! A thin, stateless adaptor: validate requests, extract the runtime token,
//! invoke the orchestrator, and map [`bolt_runtime::RuntimeError`] into the
//! JSON error envelope. All session semantics live in `bolt-runtime`.

#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;

use bolt_runtime::{
    IdleSweeper, OrchestratorSettings, RuntimeConfig, SessionOrchestrator,
};
use dokploy::{DokployClient, DokployConfig};

pub mod server;

pub use server::{build_router, AppState};

/// Wire the control plane from validated configuration. In webcontainer mode
/// the orchestrator is absent and every remote endpoint answers 400.
pub fn build_state(config: RuntimeConfig) -> Result<AppState> {
    let orchestrator = if config.is_remote() {
        let base_url = config
            .dokploy_base_url
            .clone()
            .expect("validated in RuntimeConfig");
        let api_key = config
            .dokploy_api_key
            .clone()
            .expect("validated in RuntimeConfig");
        let client = DokployClient::new(DokployConfig::new(base_url, api_key));
        let settings = OrchestratorSettings::from_config(&config)?;
        Some(SessionOrchestrator::new(
            Arc::new(client),
            settings,
            IdleSweeper::new(),
        ))
    } else {
        None
    };
    Ok(AppState::new(config, orchestrator))
}

pub fn build_app(state: AppState) -> axum::Router {
    build_router(state)
}

pub async fn serve(bind_addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(bind_addr = %bind_addr, "runtime api listening");
    axum::serve(listener, build_app(state)).await?;
    Ok(())
}
