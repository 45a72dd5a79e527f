//! MCP server over stdio that drives the Godot editor's debug adapter.

mod protocol;
mod router;
mod server;
mod tools;

use std::sync::{Arc, Mutex};

use anyhow::Context;
use godot_dap_core::{DapClient, DapConfig, SessionState};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::{
    router::Router,
    server::McpServer,
    tools::{register_all, DebugContext, ToolRegistry},
};

const LOG_FILE_ENV: &str = "GODOT_MCP_LOG_FILE";

/// stdout carries the protocol, so logs go to a file or stderr.
fn init_logging() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true);

    match std::env::var_os(LOG_FILE_ENV).filter(|path| !path.is_empty()) {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open log file {}", path.to_string_lossy()))?;
            subscriber
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => subscriber.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    let config = DapConfig::from_env();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.host,
        port = config.port,
        "starting Godot DAP MCP server on stdio"
    );

    let context = Arc::new(DebugContext::new(DapClient::new(config)));
    let mut tools = ToolRegistry::new();
    register_all(&mut tools, Arc::clone(&context));
    info!(tools = tools.len(), "tools registered");

    let router = Router::new(McpServer::new(tools));
    let served = router
        .serve(tokio::io::stdin(), tokio::io::stdout())
        .await
        .context("stdio transport failed");

    let client = context.client();
    if client.state() != SessionState::Disconnected {
        if let Err(e) = client.disconnect().await {
            warn!(error = %e, "disconnect on shutdown failed");
        }
    }
    info!("server stopped");
    served
}
