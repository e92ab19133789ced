//! Request serialization and parsing for REQUEST frames.
//!
//! # Responsibilities
//! - Serialize a buffered local request into raw HTTP/1.1 bytes
//! - Build the CONNECT payload for a tunnel job
//! - Parse a framed request head on the offshore side
//! - Extract routing-relevant information (host, port, path)
//!
//! # Design Decisions
//! - Bodies are always fully buffered, so `Transfer-Encoding` is replaced by
//!   `Content-Length`
//! - Absolute-form targets are kept on the wire; the offshore reduces them
//!   to path + query

use bytes::{BufMut, Bytes, BytesMut};
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use hyper::{Method, Request};

use crate::error::ProtocolError;

/// Most headers accepted in a framed request head.
const MAX_HEADERS: usize = 128;

/// Default port for plain HTTP upstreams.
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Default port for CONNECT targets.
pub const DEFAULT_CONNECT_PORT: u16 = 443;

/// Serialize a buffered request as a REQUEST payload.
pub fn serialize_request(request: &Request<Bytes>) -> Bytes {
    let body = request.body();
    let mut out = BytesMut::with_capacity(256 + body.len());

    out.put_slice(request.method().as_str().as_bytes());
    out.put_u8(b' ');
    out.put_slice(request.uri().to_string().as_bytes());
    out.put_slice(b" HTTP/1.1\r\n");

    if !request.headers().contains_key(HOST) {
        if let Some(authority) = request.uri().authority() {
            put_header(&mut out, HOST.as_str(), authority.as_str().as_bytes());
        }
    }

    let mut had_length = false;
    for (name, value) in request.headers() {
        if name == TRANSFER_ENCODING || name == CONTENT_LENGTH {
            had_length = true;
            continue;
        }
        put_header(&mut out, name.as_str(), value.as_bytes());
    }
    if had_length || !body.is_empty() {
        put_header(&mut out, CONTENT_LENGTH.as_str(), body.len().to_string().as_bytes());
    }

    out.put_slice(b"\r\n");
    out.put_slice(body);
    out.freeze()
}

/// Build the REQUEST payload that asks the offshore to open a tunnel.
pub fn serialize_connect(authority: &str) -> Bytes {
    Bytes::from(format!(
        "CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n\r\n"
    ))
}

fn put_header(out: &mut BytesMut, name: &str, value: &[u8]) {
    out.put_slice(name.as_bytes());
    out.put_slice(b": ");
    out.put_slice(value);
    out.put_slice(b"\r\n");
}

/// Ensure `authority` carries a port, appending `default_port` if it doesn't.
///
/// Bracketed IPv6 literals are handled; the brackets are kept.
pub fn authority_with_default_port(authority: &str, default_port: u16) -> String {
    let authority = authority.trim();
    let has_port = match authority.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty()
                && !port.contains(']')
                && (host.starts_with('[') || !host.contains(':'))
                && port.parse::<u16>().is_ok()
        }
        None => false,
    };
    if has_port {
        authority.to_string()
    } else if authority.contains(':') && !authority.starts_with('[') {
        format!("[{}]:{}", authority, default_port)
    } else {
        format!("{}:{}", authority, default_port)
    }
}

/// A request decoded from a REQUEST frame.
#[derive(Debug, Clone)]
pub struct FramedRequest {
    pub method: Method,
    pub target: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FramedRequest {
    /// Parse a raw HTTP/1.x request. Everything after the head is the body.
    pub fn parse(payload: &Bytes) -> Result<Self, ProtocolError> {
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut slots);
        let head_len = match parsed.parse(payload) {
            Ok(httparse::Status::Complete(n)) => n,
            Ok(httparse::Status::Partial) => {
                return Err(ProtocolError::MalformedHttp("incomplete request head".into()))
            }
            Err(e) => return Err(ProtocolError::MalformedHttp(e.to_string())),
        };

        let method = parsed
            .method
            .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
            .ok_or_else(|| ProtocolError::MalformedHttp("invalid method".into()))?;
        let target = parsed
            .path
            .ok_or_else(|| ProtocolError::MalformedHttp("missing request target".into()))?
            .to_string();

        let mut headers = HeaderMap::with_capacity(parsed.headers.len());
        for header in parsed.headers.iter() {
            let name = HeaderName::from_bytes(header.name.as_bytes())
                .map_err(|e| ProtocolError::MalformedHttp(e.to_string()))?;
            let value = HeaderValue::from_bytes(header.value)
                .map_err(|e| ProtocolError::MalformedHttp(e.to_string()))?;
            headers.append(name, value);
        }

        Ok(Self {
            method,
            target,
            headers,
            body: payload.slice(head_len..),
        })
    }

    pub fn is_connect(&self) -> bool {
        self.method == Method::CONNECT
    }

    /// The Host header, if present and valid UTF-8.
    pub fn host(&self) -> Option<&str> {
        self.headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|h| !h.is_empty())
    }

    /// Path and query to send upstream. Absolute-form targets are reduced.
    pub fn path(&self) -> String {
        if self.target.starts_with('/') {
            return self.target.clone();
        }
        match url::Url::parse(&self.target) {
            Ok(url) => match url.query() {
                Some(query) => format!("{}?{}", url.path(), query),
                None => url.path().to_string(),
            },
            Err(_) => "/".to_string(),
        }
    }

    /// `host:port` to dial for a CONNECT request.
    pub fn connect_authority(&self) -> String {
        authority_with_default_port(&self.target, DEFAULT_CONNECT_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_buffered_request_with_content_length() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("http://example.com/submit?x=1")
            .header("transfer-encoding", "chunked")
            .header("x-trace", "abc")
            .body(Bytes::from_static(b"hello"))
            .unwrap();

        let raw = serialize_request(&request);
        let text = std::str::from_utf8(&raw).unwrap();
        assert!(text.starts_with("POST http://example.com/submit?x=1 HTTP/1.1\r\n"));
        assert!(text.contains("host: example.com\r\n"));
        assert!(text.contains("x-trace: abc\r\n"));
        assert!(text.contains("content-length: 5\r\n"));
        assert!(!text.contains("transfer-encoding"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn get_without_body_has_no_length() {
        let request = Request::builder()
            .uri("http://example.com/")
            .header("host", "example.com")
            .body(Bytes::new())
            .unwrap();
        let raw = serialize_request(&request);
        let text = std::str::from_utf8(&raw).unwrap();
        assert_eq!(text, "GET http://example.com/ HTTP/1.1\r\nhost: example.com\r\n\r\n");
    }

    #[test]
    fn parses_serialized_request() {
        let raw = Bytes::from_static(
            b"PUT http://api.local:8081/items/7?full=1 HTTP/1.1\r\nHost: api.local:8081\r\nContent-Length: 3\r\n\r\nabc",
        );
        let parsed = FramedRequest::parse(&raw).unwrap();
        assert_eq!(parsed.method, Method::PUT);
        assert_eq!(parsed.host(), Some("api.local:8081"));
        assert_eq!(parsed.path(), "/items/7?full=1");
        assert_eq!(&parsed.body[..], b"abc");
        assert!(!parsed.is_connect());
    }

    #[test]
    fn connect_payload_round_trips() {
        let parsed = FramedRequest::parse(&serialize_connect("example.com:8443")).unwrap();
        assert!(parsed.is_connect());
        assert_eq!(parsed.connect_authority(), "example.com:8443");
        assert_eq!(parsed.host(), Some("example.com:8443"));
    }

    #[test]
    fn truncated_head_is_malformed() {
        let raw = Bytes::from_static(b"GET / HTTP/1.1\r\nHost: a");
        assert!(matches!(
            FramedRequest::parse(&raw),
            Err(ProtocolError::MalformedHttp(_))
        ));
    }

    #[test]
    fn default_ports_are_applied() {
        assert_eq!(authority_with_default_port("example.com", 443), "example.com:443");
        assert_eq!(authority_with_default_port("example.com:80", 443), "example.com:80");
        assert_eq!(authority_with_default_port("[::1]", 80), "[::1]:80");
        assert_eq!(authority_with_default_port("[::1]:8080", 80), "[::1]:8080");
        assert_eq!(authority_with_default_port("::1", 443), "[::1]:443");
    }
}
