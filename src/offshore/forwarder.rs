//! Outbound HTTP for framed requests.
//!
//! # Responsibilities
//! - Rebuild an upstream request from a `FramedRequest` (Host header decides
//!   where it goes; the target's scheme is ignored and plain HTTP is used)
//! - Enforce the request deadline and the response size limit
//! - Buffer the whole response and serialize it as a RESPONSE payload

use std::error::Error as StdError;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::ext::ReasonPhrase;
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;

use crate::http::request::{authority_with_default_port, FramedRequest, DEFAULT_HTTP_PORT};
use crate::http::response::{is_bodiless, serialize_response};

/// Why a framed request could not be forwarded.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("missing Host header")]
    MissingHost,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Client(String),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("response body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

impl ForwardError {
    fn client(error: hyper_util::client::legacy::Error) -> Self {
        ForwardError::Client(error_chain(&error))
    }
}

/// Join an error and its sources, e.g. "client error (Connect): tcp connect
/// error: Connection refused".
fn error_chain(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Pooled HTTP/1.1 client shared by every ship connection.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: Client<HttpConnector, Full<Bytes>>,
    request_timeout: Duration,
    max_response_body: usize,
}

impl HttpForwarder {
    pub fn new(connect_timeout: Duration, request_timeout: Duration, max_response_body: usize) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self {
            client,
            request_timeout,
            max_response_body,
        }
    }

    /// Perform `request` upstream and return the serialized response.
    pub async fn forward(&self, request: FramedRequest) -> Result<Bytes, ForwardError> {
        let upstream = self.build_request(request)?;
        let method = upstream.method().clone();
        let uri = upstream.uri().clone();

        let response = tokio::time::timeout(self.request_timeout, self.exchange(upstream, &method))
            .await
            .map_err(|_| ForwardError::Timeout(self.request_timeout))??;

        tracing::debug!(method = %method, uri = %uri, response_bytes = response.len(), "Forwarded request");
        Ok(response)
    }

    fn build_request(&self, request: FramedRequest) -> Result<Request<Full<Bytes>>, ForwardError> {
        let host = request.host().ok_or(ForwardError::MissingHost)?;
        let authority = authority_with_default_port(host, DEFAULT_HTTP_PORT);
        let uri: Uri = format!("http://{}{}", authority, request.path())
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| ForwardError::InvalidRequest(e.to_string()))?;

        let mut builder = Request::builder().method(request.method).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in request.headers.iter() {
                if name.as_str() == "proxy-connection" {
                    continue;
                }
                headers.append(name.clone(), value.clone());
            }
        }

        builder
            .body(Full::new(request.body))
            .map_err(|e| ForwardError::InvalidRequest(e.to_string()))
    }

    async fn exchange(&self, request: Request<Full<Bytes>>, method: &Method) -> Result<Bytes, ForwardError> {
        let response = self.client.request(request).await.map_err(ForwardError::client)?;
        let (parts, body) = response.into_parts();

        let body = Limited::new(body, self.max_response_body)
            .collect()
            .await
            .map_err(|e| {
                if e.is::<LengthLimitError>() {
                    ForwardError::TooLarge {
                        limit: self.max_response_body,
                    }
                } else {
                    ForwardError::Body(e.to_string())
                }
            })?
            .to_bytes();

        let reason = parts.extensions.get::<ReasonPhrase>().map(|r| r.as_bytes());
        let bodiless = is_bodiless(method, parts.status);
        Ok(serialize_response(parts.status, reason, &parts.headers, &body, bodiless))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn forwarder() -> HttpForwarder {
        HttpForwarder::new(Duration::from_secs(2), Duration::from_secs(2), 1024)
    }

    fn framed(raw: String) -> FramedRequest {
        FramedRequest::parse(&Bytes::from(raw)).unwrap()
    }

    /// Accept one connection, capture its request head, answer with `reply`.
    async fn one_shot_upstream(reply: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            let mut buf = [0u8; 1024];
            while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
            }
            socket.write_all(reply.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&seen).into_owned()
        });
        (addr, task)
    }

    #[tokio::test]
    async fn forwards_to_host_header_with_origin_form_path() {
        let (addr, upstream) =
            one_shot_upstream("HTTP/1.1 200 OK\r\nContent-Length: 5\r\nX-Up: 1\r\n\r\nhello".into()).await;
        let request = framed(format!(
            "GET http://{addr}/greet?name=sea HTTP/1.1\r\nHost: {addr}\r\nProxy-Connection: keep-alive\r\nX-Ship: 7\r\n\r\n"
        ));

        let response = forwarder().forward(request).await.unwrap();
        let text = String::from_utf8_lossy(&response).into_owned();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("x-up: 1\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));

        let head = upstream.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("get /greet?name=sea http/1.1\r\n"));
        assert!(head.contains("x-ship: 7"));
        assert!(!head.contains("proxy-connection"));
    }

    #[tokio::test]
    async fn head_response_keeps_upstream_length() {
        let (addr, _upstream) =
            one_shot_upstream("HTTP/1.1 200 OK\r\nContent-Length: 42\r\n\r\n".into()).await;
        let request = framed(format!("HEAD /file HTTP/1.1\r\nHost: {addr}\r\n\r\n"));

        let response = forwarder().forward(request).await.unwrap();
        let text = String::from_utf8_lossy(&response).into_owned();
        assert!(text.ends_with("content-length: 42\r\n\r\n"));
    }

    #[tokio::test]
    async fn oversized_response_is_refused() {
        let reply = format!("HTTP/1.1 200 OK\r\nContent-Length: 2048\r\n\r\n{}", "x".repeat(2048));
        let (addr, _upstream) = one_shot_upstream(reply).await;
        let request = framed(format!("GET / HTTP/1.1\r\nHost: {addr}\r\n\r\n"));
        let err = forwarder().forward(request).await.unwrap_err();
        assert!(matches!(err, ForwardError::TooLarge { limit: 1024 }));
    }

    #[tokio::test]
    async fn refused_connection_is_a_client_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let request = framed(format!("GET / HTTP/1.1\r\nHost: {addr}\r\n\r\n"));
        let err = forwarder().forward(request).await.unwrap_err();
        assert!(matches!(err, ForwardError::Client(_)));
    }

    #[tokio::test]
    async fn missing_host_is_reported() {
        let request = framed("GET /no-host HTTP/1.1\r\n\r\n".to_string());
        let err = forwarder().forward(request).await.unwrap_err();
        assert!(matches!(err, ForwardError::MissingHost));
    }
}
