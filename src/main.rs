//! Crossbar entry point: wiring, signals, and the serve loop.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use crossbar::backend::http::{HttpBackendHost, HttpHostConfig};
use crossbar::config::{self, HubConfig};
use crossbar::server::HubServer;

/// CLI arguments; environment variables cover everything else.
#[derive(Parser, Debug)]
#[command(author, version, about = "MCP capability-aggregation hub", long_about = None)]
struct Args {
    /// Client listen address (overrides CROSSBAR_LISTEN)
    #[arg(long)]
    listen: Option<String>,

    /// Admin listen address (overrides CROSSBAR_ADMIN_LISTEN)
    #[arg(long)]
    admin_listen: Option<String>,

    /// Path to the backend roster JSON file
    #[arg(long, env = "CROSSBAR_BACKENDS")]
    backends: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut hub_config = HubConfig::from_env();
    if let Some(listen) = args.listen {
        hub_config.listen_addr = listen;
    }
    if let Some(admin_listen) = args.admin_listen {
        hub_config.admin_addr = admin_listen;
    }

    let roster = match &args.backends {
        Some(path) => config::load_roster(path)?,
        None => {
            warn!("no backend roster given; hub starts with an empty catalog");
            Vec::new()
        }
    };

    info!(
        listen = %hub_config.listen_addr,
        admin = %hub_config.admin_addr,
        backends = roster.len(),
        request_timeout_secs = hub_config.request_timeout.as_secs(),
        "crossbar starting"
    );

    let host = Arc::new(HttpBackendHost::new(roster, HttpHostConfig::default())?);
    host.connect_all().await;

    let server = HubServer::with_host(hub_config, host);

    let lifecycle = server.state().lifecycle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received SIGINT, initiating graceful shutdown");
                lifecycle.begin_shutdown();
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGINT");
            }
        }
    });

    #[cfg(unix)]
    {
        let lifecycle = server.state().lifecycle.clone();
        tokio::spawn(async move {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("received SIGTERM, initiating graceful shutdown");
                    lifecycle.begin_shutdown();
                }
                Err(e) => {
                    error!(error = %e, "failed to listen for SIGTERM");
                }
            }
        });
    }

    server.run().await
}
