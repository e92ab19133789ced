//! Startup orchestration.
//!
//! # Responsibilities
//! - Bind the role's listener (fail fast on bind errors)
//! - Spawn the role's long-running tasks
//! - Hand back the bound address and, for the ship, the uplink status
//!
//! # Design Decisions
//! - Configuration is validated before anything here runs
//! - The listener binds before any task starts, so callers (and tests)
//!   learn the real port from the handle

use std::net::SocketAddr;

use thiserror::Error;
use tokio::task::JoinHandle;

use super::shutdown::Shutdown;
use crate::config::RelayConfig;
use crate::http::IngressServer;
use crate::net::{LinkStatus, Listener, ListenerError};
use crate::offshore::OffshoreServer;
use crate::ship::{job_queue, JobQueue, UplinkSession};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{0}")]
    Listener(#[from] ListenerError),
}

/// A running ship: local proxy listener plus uplink session.
#[derive(Debug)]
pub struct ShipHandle {
    pub listen_addr: SocketAddr,
    pub status: LinkStatus,
    pub jobs: JobQueue,
    ingress: JoinHandle<()>,
    session: JoinHandle<()>,
}

impl ShipHandle {
    /// Wait for both tasks to finish after shutdown was triggered.
    pub async fn wait(self) {
        let _ = self.ingress.await;
        let _ = self.session.await;
    }
}

/// A running offshore relay.
#[derive(Debug)]
pub struct OffshoreHandle {
    pub bind_addr: SocketAddr,
    server: JoinHandle<()>,
}

impl OffshoreHandle {
    pub async fn wait(self) {
        let _ = self.server.await;
    }
}

pub async fn start_ship(config: &RelayConfig, shutdown: &Shutdown) -> Result<ShipHandle, StartupError> {
    let listener = Listener::bind("proxy clients", &config.ship.listen_address, config.ship.max_connections).await?;
    let listen_addr = listener.local_addr();

    let (jobs, receiver) = job_queue();
    let (session, status) = UplinkSession::new(config, receiver);
    tracing::info!(
        listen_address = %listen_addr,
        offshore_address = %config.ship.offshore_address,
        reconnect_delay_ms = config.ship.reconnect_delay_ms,
        "Starting ship"
    );

    let session = tokio::spawn(session.run(shutdown.subscribe()));
    let ingress = {
        let server = IngressServer::new(jobs.clone(), config.ship.max_request_body);
        let shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = server.run(listener, shutdown).await {
                tracing::error!(error = %e, "Ingress failed");
            }
        })
    };

    Ok(ShipHandle {
        listen_addr,
        status,
        jobs,
        ingress,
        session,
    })
}

pub async fn start_offshore(
    config: &RelayConfig,
    shutdown: &Shutdown,
) -> Result<OffshoreHandle, StartupError> {
    let listener = Listener::bind("ship links", &config.offshore.bind_address, config.offshore.max_connections).await?;
    let bind_addr = listener.local_addr();
    tracing::info!(
        bind_address = %bind_addr,
        max_response_body = config.offshore.max_response_body,
        "Starting offshore relay"
    );

    let server = OffshoreServer::new(config);
    let shutdown = shutdown.subscribe();
    let server = tokio::spawn(async move {
        if let Err(e) = server.run(listener, shutdown).await {
            tracing::error!(error = %e, "Offshore relay failed");
        }
    });

    Ok(OffshoreHandle { bind_addr, server })
}
