//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ship_relay::lifecycle::{start_offshore, start_ship, ShipHandle};
use ship_relay::{RelayConfig, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Start a simple mock backend that returns a fixed response.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move { (200, response.to_string()) }).await
}

/// Start a programmable mock backend with async support.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let _ = read_request(&mut socket).await;
                let (status, body) = f().await;
                let status_text = match status {
                    200 => "200 OK",
                    404 => "404 Not Found",
                    500 => "500 Internal Server Error",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };

                let response_str = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response_str.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Start a backend that answers every request with the request's own body.
pub async fn start_body_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let body = read_request(&mut socket).await.unwrap_or_default();
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Read one request head plus a `Content-Length` body; returns the body.
async fn read_request(socket: &mut TcpStream) -> Option<Vec<u8>> {
    let mut seen = Vec::new();
    let mut buf = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = seen.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        seen.extend_from_slice(&buf[..n]);
    };

    let head = String::from_utf8_lossy(&seen[..head_end]).to_ascii_lowercase();
    let length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while seen.len() < head_end + length {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            break;
        }
        seen.extend_from_slice(&buf[..n]);
    }
    Some(seen[head_end..].to_vec())
}

/// Start a TCP echo service.
pub async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut rd, mut wr) = socket.split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });
    addr
}

/// A TCP pipe in front of the offshore relay whose live connections can be
/// severed on demand, while new connections are still accepted.
#[derive(Clone)]
pub struct LinkCutter {
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl LinkCutter {
    /// Drop every connection currently passing through the pipe.
    pub fn cut(&self) {
        for task in self.connections.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

pub async fn start_cuttable_pipe(target: SocketAddr) -> (SocketAddr, LinkCutter) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cutter = LinkCutter {
        connections: Arc::new(Mutex::new(Vec::new())),
    };

    let connections = cutter.connections.clone();
    tokio::spawn(async move {
        while let Ok((mut inbound, _)) = listener.accept().await {
            let task = tokio::spawn(async move {
                if let Ok(mut outbound) = TcpStream::connect(target).await {
                    let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                }
            });
            connections.lock().unwrap().push(task);
        }
    });
    (addr, cutter)
}

/// A ship and an offshore relay wired through a cuttable pipe.
pub struct RelayPair {
    pub ship: ShipHandle,
    pub offshore_addr: SocketAddr,
    pub cutter: LinkCutter,
    pub shutdown: Shutdown,
}

impl RelayPair {
    pub fn proxy_url(&self) -> String {
        format!("http://{}", self.ship.listen_addr)
    }

    /// HTTP client that sends everything through the ship's proxy port.
    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .proxy(reqwest::Proxy::all(self.proxy_url()).unwrap())
            .pool_max_idle_per_host(0)
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap()
    }
}

pub fn test_config() -> RelayConfig {
    let mut config = RelayConfig::default();
    config.ship.listen_address = "127.0.0.1:0".into();
    config.ship.reconnect_delay_ms = 50;
    config.offshore.bind_address = "127.0.0.1:0".into();
    config.timeouts.connect_secs = 2;
    config.timeouts.request_secs = 5;
    config
}

pub async fn start_relay_pair() -> RelayPair {
    let shutdown = Shutdown::new();
    let mut config = test_config();

    let offshore = start_offshore(&config, &shutdown).await.unwrap();
    let (pipe_addr, cutter) = start_cuttable_pipe(offshore.bind_addr).await;
    config.ship.offshore_address = pipe_addr.to_string();

    let ship = start_ship(&config, &shutdown).await.unwrap();
    let mut status = ship.status.clone();
    tokio::time::timeout(Duration::from_secs(5), status.wait_connected())
        .await
        .unwrap()
        .unwrap();

    RelayPair {
        ship,
        offshore_addr: offshore.bind_addr,
        cutter,
        shutdown,
    }
}
