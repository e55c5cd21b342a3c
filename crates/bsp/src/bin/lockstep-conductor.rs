//! lockstep-conductor — standalone barrier coordinator for a lockstep cluster.
//!
//! Binds a ROUTER socket and releases each barrier once every peer has
//! entered it. Stateless across rounds: one conductor can serve any number
//! of consecutive jobs as long as the peer count stays the same.
//!
//! # Usage
//!
//! ```bash
//! # Two-peer cluster on the default endpoint
//! lockstep-conductor --peers 2
//!
//! # Custom TCP endpoint
//! lockstep-conductor --endpoint tcp://0.0.0.0:7400 --peers 4
//!
//! # Via environment variables
//! LOCKSTEP_CONDUCTOR=tcp://0.0.0.0:7400 LOCKSTEP_PEER_COUNT=4 lockstep-conductor
//! ```

use std::sync::Arc;

use clap::Parser;
use lockstep_bsp::{Conductor, ConductorConfig, Transport};

/// Barrier coordinator for a lockstep cluster.
#[derive(Parser, Debug)]
#[command(name = "lockstep-conductor", version, about)]
struct Cli {
    /// Endpoint to bind the barrier ROUTER socket on.
    #[arg(
        long,
        env = "LOCKSTEP_CONDUCTOR",
        default_value = "tcp://127.0.0.1:7400"
    )]
    endpoint: String,

    /// Number of peers that must enter a barrier before it releases.
    #[arg(long, env = "LOCKSTEP_PEER_COUNT")]
    peers: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lockstep_core::load_dotenv();

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!(?cli, "starting lockstep-conductor");

    if cli.peers == 0 {
        anyhow::bail!("--peers must be at least 1");
    }

    let config = ConductorConfig {
        endpoint: Transport::parse(&cli.endpoint)?,
        peers: cli.peers,
    };
    let conductor = Arc::new(Conductor::new(config));

    // Install signal handlers for graceful shutdown.
    let conductor_for_signal = conductor.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        conductor_for_signal.shutdown();
    });

    // Run the barrier loop (blocks until shutdown).
    conductor.run().await?;

    tracing::info!(rounds = conductor.rounds(), "lockstep-conductor exited cleanly");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for ctrl_c");
    }
}
