//! Response handling and transformation.
//!
//! # Responsibilities
//! - Serialize a buffered upstream response into a RESPONSE payload
//! - Turn a RESPONSE payload back into a local response
//! - Map offshore and link failures to 502 Bad Gateway
//!
//! # Design Decisions
//! - Hop-by-hop headers stripped in both directions
//! - Local responses always close the client connection
//! - `Content-Length` is recomputed from the buffered body, except for
//!   responses that never carry one (HEAD, 1xx, 204, 304)

use std::fmt::Display;

use bytes::{BufMut, Bytes, BytesMut};
use http_body_util::Full;
use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE,
};
use hyper::{Method, Response, StatusCode};

use crate::error::ProtocolError;

const MAX_HEADERS: usize = 128;

/// Headers that describe a single hop and are never relayed.
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Whether a response to `method` with `status` has no body, whatever its
/// `Content-Length` says.
pub fn is_bodiless(method: &Method, status: StatusCode) -> bool {
    method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

/// Serialize an upstream response as a RESPONSE payload.
///
/// `reason` is the upstream's own reason phrase; the canonical one is used
/// when it is absent. A `bodiless` response keeps the upstream's declared
/// `Content-Length`.
pub fn serialize_response(
    status: StatusCode,
    reason: Option<&[u8]>,
    headers: &HeaderMap,
    body: &[u8],
    bodiless: bool,
) -> Bytes {
    let mut headers = headers.clone();
    strip_hop_by_hop(&mut headers);
    let declared = headers.remove(CONTENT_LENGTH);

    let mut out = BytesMut::with_capacity(256 + body.len());
    out.put_slice(b"HTTP/1.1 ");
    out.put_slice(status.as_str().as_bytes());
    out.put_u8(b' ');
    match reason {
        Some(reason) => out.put_slice(reason),
        None => out.put_slice(status.canonical_reason().unwrap_or("Unknown").as_bytes()),
    }
    out.put_slice(b"\r\n");
    for (name, value) in &headers {
        out.put_slice(name.as_str().as_bytes());
        out.put_slice(b": ");
        out.put_slice(value.as_bytes());
        out.put_slice(b"\r\n");
    }
    match declared {
        Some(length) if bodiless && body.is_empty() => {
            out.put_slice(b"content-length: ");
            out.put_slice(length.as_bytes());
            out.put_slice(b"\r\n");
        }
        _ if bodiless && body.is_empty() => {}
        _ => {
            out.put_slice(b"content-length: ");
            out.put_slice(body.len().to_string().as_bytes());
            out.put_slice(b"\r\n");
        }
    }
    out.put_slice(b"\r\n");
    out.put_slice(body);
    out.freeze()
}

/// Status of a raw HTTP response head, such as a tunnel acknowledgement.
pub fn parse_status(payload: &[u8]) -> Result<StatusCode, ProtocolError> {
    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut slots);
    parsed
        .parse(payload)
        .map_err(|e| ProtocolError::MalformedHttp(e.to_string()))?;
    parsed
        .code
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| ProtocolError::MalformedHttp("missing status code".into()))
}

/// Rebuild a local response from a RESPONSE payload.
pub fn parse_raw_response(payload: Bytes) -> Result<Response<Full<Bytes>>, ProtocolError> {
    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut slots);
    let head_len = match parsed.parse(&payload) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => {
            return Err(ProtocolError::MalformedHttp("incomplete response head".into()))
        }
        Err(e) => return Err(ProtocolError::MalformedHttp(e.to_string())),
    };

    let status = parsed
        .code
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| ProtocolError::MalformedHttp("missing status code".into()))?;

    let body = payload.slice(head_len..);
    let empty = body.is_empty();
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    for header in parsed.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|e| ProtocolError::MalformedHttp(e.to_string()))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|e| ProtocolError::MalformedHttp(e.to_string()))?;
        headers.append(name, value);
    }
    strip_hop_by_hop(headers);
    // An empty body with a declared length answers HEAD or is a 304.
    if !empty {
        headers.remove(CONTENT_LENGTH);
    }
    headers.insert(CONNECTION, HeaderValue::from_static("close"));

    Ok(response)
}

/// `502 Bad Gateway` with a plain-text diagnostic.
pub fn gateway_error(diagnostic: impl Display) -> Response<Full<Bytes>> {
    text_response(StatusCode::BAD_GATEWAY, format!("Offshore error: {}", diagnostic))
}

/// A plain-text response that closes the local connection.
pub fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert(CONNECTION, HeaderValue::from_static("close"));
    response
}
