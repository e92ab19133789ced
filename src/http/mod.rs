//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Ship:
//!     local TCP connection
//!         → server.rs (hyper, CONNECT upgrade)
//!         → request.rs (serialize into REQUEST payload)
//!         → [uplink session]
//!         → response.rs (RESPONSE payload → local response, or 502)
//!
//! Offshore:
//!     REQUEST payload
//!         → request.rs (httparse head, host/path extraction)
//!         → [forwarder]
//!         → response.rs (upstream response → RESPONSE payload)
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::FramedRequest;
pub use server::IngressServer;
