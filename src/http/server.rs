//! Ship ingress: the local HTTP proxy listener.
//!
//! # Responsibilities
//! - Serve local proxy connections with hyper (HTTP/1.1, upgrades enabled)
//! - Turn CONNECT into a `ConnectJob` carrying the pending upgraded socket
//! - Buffer any other request (bounded) into an `HttpJob`
//! - Answer with the offshore response, or 502 when the job fails

use std::convert::Infallible;
use std::io;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::sync::broadcast;

use crate::http::request::{authority_with_default_port, DEFAULT_CONNECT_PORT};
use crate::http::response::{gateway_error, parse_raw_response, text_response};
use crate::net::{Accepted, Listener, ListenerError};
use crate::ship::job::{JobQueue, LocalSocket, PendingSocket};

/// Accepts local proxy clients and feeds the job queue.
#[derive(Debug, Clone)]
pub struct IngressServer {
    jobs: JobQueue,
    max_request_body: usize,
}

impl IngressServer {
    pub fn new(jobs: JobQueue, max_request_body: usize) -> Self {
        Self {
            jobs,
            max_request_body,
        }
    }

    /// Accept connections until shutdown.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        tracing::info!(address = %listener.local_addr(), "Ingress listening for proxy clients");

        loop {
            let accepted = tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => accepted,
            };

            let Accepted { stream, peer, permit } = match accepted {
                Ok(accepted) => accepted,
                Err(e) if e.is_transient() => {
                    tracing::warn!(error = %e, "Failed to accept proxy client");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let server = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let service = service_fn(move |request| {
                    let server = server.clone();
                    async move { Ok::<_, Infallible>(server.proxy_request(request).await) }
                });

                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .with_upgrades()
                    .await
                {
                    tracing::debug!(peer_addr = %peer, error = %e, "Proxy client connection ended with error");
                }
            });
        }

        tracing::info!("Ingress stopped");
        Ok(())
    }

    /// Handle one local request.
    pub async fn proxy_request(&self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        if request.method() == Method::CONNECT {
            return self.connect(request).await;
        }

        let (parts, body) = request.into_parts();
        let body = match Limited::new(body, self.max_request_body).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => {
                return text_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    format!("Request body exceeds {} bytes", self.max_request_body),
                );
            }
            Err(e) => {
                tracing::debug!(error = %e, "Failed to read request body");
                return text_response(StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e));
            }
        };

        let request = Request::from_parts(parts, body);
        match self.jobs.http(request).await {
            Ok(payload) => match parse_raw_response(payload) {
                Ok(response) => response,
                Err(e) => gateway_error(e),
            },
            Err(e) => gateway_error(e),
        }
    }

    async fn connect(&self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        let authority = match request.uri().authority() {
            Some(authority) => authority_with_default_port(authority.as_str(), DEFAULT_CONNECT_PORT),
            None => {
                return text_response(
                    StatusCode::BAD_REQUEST,
                    "CONNECT target must be host:port".to_string(),
                );
            }
        };

        let upgrade = hyper::upgrade::on(request);
        let socket: PendingSocket = Box::pin(async move {
            let upgraded = upgrade.await.map_err(io::Error::other)?;
            Ok::<_, io::Error>(Box::new(TokioIo::new(upgraded)) as LocalSocket)
        });

        match self.jobs.connect(authority, socket).await {
            Ok(status) => {
                let mut response = Response::new(Full::new(Bytes::new()));
                *response.status_mut() = status;
                response
            }
            Err(e) => gateway_error(e),
        }
    }
}
