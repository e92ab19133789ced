//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events, per-link and per-stream fields)
//!     → metrics.rs (frame counters, stream and tunnel gauges)
//!
//! Consumers:
//!     → stdout (tracing-subscriber fmt layer)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Every log line about a stream carries its `correlation_id`
//! - Metric updates go through the `metrics` facade and cost nothing when no
//!   recorder is installed

pub mod logging;
pub mod metrics;
