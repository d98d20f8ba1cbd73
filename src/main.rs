//! netspeed: A network throughput tester
//!
//! One binary, two modes:
//! - Server: accepts signed-token connections and streams or sinks
//!   pseudorandom data for a fixed time
//! - Client: measures download then upload speed against a server
//!
//! Features:
//! - 123-byte signed token handshake with a 30 second replay window
//! - Bounded number of concurrent sessions
//! - Graceful shutdown on SIGINT, SIGTERM and SIGQUIT
//! - Configuration via CLI arguments, environment or TOML file

mod auth;
mod client;
mod config;
mod format;
mod server;
mod session;
mod stream;
mod transfer;

use client::Client;
use config::Config;
use server::Server;
use stream::{CancelHandle, Context};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let (ctx, handle) = Context::with_cancel();
    tokio::spawn(shutdown_signal(handle));

    if config.server_mode {
        run_server(config, ctx).await
    } else {
        run_client(config, ctx).await
    }
}

async fn run_server(config: Config, ctx: Context) -> Result<(), Box<dyn std::error::Error>> {
    let credentials = config.credential_table()?;

    info!(
        address = %config.address(),
        timeout = ?config.timeout,
        max_clients = config.max_clients,
        signature = ?config.signature,
        "Starting netspeed server"
    );

    Server::new(&config, credentials).run(ctx).await?;
    Ok(())
}

async fn run_client(config: Config, ctx: Context) -> Result<(), Box<dyn std::error::Error>> {
    let key = config.client_key()?;

    info!(
        address = %config.address(),
        client = key.client_id(),
        timeout = ?config.timeout,
        "Starting netspeed client"
    );

    Client::new(&config, key)
        .run(&ctx, &mut std::io::stdout())
        .await?;
    Ok(())
}

/// Cancel `handle` on the first termination signal.
async fn shutdown_signal(handle: CancelHandle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::quit())) {
            (Ok(mut term), Ok(mut quit)) => {
                tokio::select! {
                    _ = term.recv() => {}
                    _ = quit.recv() => {}
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
    handle.cancel();
}
