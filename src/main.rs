//! ship-relay: one multiplexed link from a restricted ship to an offshore
//! egress relay.
//!
//! # Architecture Overview
//!
//! ```text
//!   SHIP                                                   OFFSHORE
//!  ┌──────────────────────────────────┐          ┌──────────────────────────────────┐
//!  │ local client                     │          │                                  │
//!  │   │                              │          │  ┌────────┐   ┌───────────────┐  │
//!  │   ▼                              │  frames  │  │ server │──▶│ DownlinkRouter│  │
//!  │ ┌─────────┐  ┌──────┐  ┌───────┐ │ ◀──────▶ │  └────────┘   └──────┬────────┘  │
//!  │ │ ingress │─▶│ jobs │─▶│uplink │─┼──────────┼──────────▶   ┌───────┴───────┐   │
//!  │ │ (hyper) │  └──────┘  │session│ │  one TCP │              │forwarder│tunnel│──┼──▶ upstream
//!  │ └─────────┘            └───┬───┘ │          │              └───────────────┘   │
//!  │      ▲      registry ◀─────┘     │          │                                  │
//!  │      └────── tunnel relays       │          │                                  │
//!  └──────────────────────────────────┘          └──────────────────────────────────┘
//! ```
//!
//! Run `ship-relay ship` on the restricted side and `ship-relay offshore`
//! on the egress side.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use ship_relay::config::{self, ConfigError, RelayConfig, Role};
use ship_relay::lifecycle::{self, signals, Shutdown};
use ship_relay::observability::{logging, metrics};

/// How long to wait for tasks after shutdown before exiting anyway.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "ship-relay", version)]
#[command(about = "Multiplexed HTTP/CONNECT relay over a single ship-to-shore link", long_about = None)]
struct Cli {
    /// TOML configuration file (every setting has a default).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level for this crate (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    role: Command,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Run the restricted side: local HTTP proxy plus uplink.
    Ship,
    /// Run the egress side: accept ship links and reach upstreams.
    Offshore,
}

impl From<Command> for Role {
    fn from(command: Command) -> Self {
        match command {
            Command::Ship => Role::Ship,
            Command::Offshore => Role::Offshore,
        }
    }
}

fn load(cli: &Cli, role: Role) -> Result<RelayConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => config::loader::read_config(path)?,
        None => RelayConfig::default(),
    };
    config::apply_env_overrides(&mut config, role, |key| std::env::var(key).ok())?;
    if let Some(level) = &cli.log_level {
        config.observability.log_level = level.clone();
    }
    config::validation::validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let role = Role::from(cli.role);
    let config = load(&cli, role)?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), role = ?role, "ship-relay starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    let finished = match role {
        Role::Ship => {
            let handle = lifecycle::start_ship(&config, &shutdown).await?;
            wait_for_shutdown(&shutdown).await;
            tokio::time::timeout(SHUTDOWN_TIMEOUT, handle.wait()).await
        }
        Role::Offshore => {
            let handle = lifecycle::start_offshore(&config, &shutdown).await?;
            wait_for_shutdown(&shutdown).await;
            tokio::time::timeout(SHUTDOWN_TIMEOUT, handle.wait()).await
        }
    };

    if finished.is_err() {
        tracing::warn!(timeout_secs = SHUTDOWN_TIMEOUT.as_secs(), "Shutdown timed out, exiting");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn wait_for_shutdown(shutdown: &Shutdown) {
    let mut rx = shutdown.subscribe();
    if !shutdown.is_triggered() {
        let _ = rx.recv().await;
    }
}
