//! Relay metrics.
//!
//! # Metrics
//! - `relay_frames_total` (counter): frames by `direction` (in/out) and `type`
//! - `relay_link_reconnects_total` (counter): uplink reconnection attempts
//! - `relay_link_connected` (gauge): 1 while the uplink is connected
//! - `relay_pending_streams` (gauge): ship-side registry size
//! - `relay_active_tunnels` (gauge): running tunnel relays
//! - `relay_ship_connections` (gauge): offshore-side accepted ship links
//! - `relay_stream_errors_total` (counter): ERROR frames by `reason`

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::protocol::FrameType;

/// Install the Prometheus recorder and its HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_frame_sent(kind: FrameType) {
    counter!("relay_frames_total", "direction" => "out", "type" => kind.as_str()).increment(1);
}

pub fn record_frame_received(kind: FrameType) {
    counter!("relay_frames_total", "direction" => "in", "type" => kind.as_str()).increment(1);
}

pub fn record_link_reconnect() {
    counter!("relay_link_reconnects_total").increment(1);
}

pub fn record_link_connected(connected: bool) {
    gauge!("relay_link_connected").set(if connected { 1.0 } else { 0.0 });
}

pub fn record_pending_streams(count: usize) {
    gauge!("relay_pending_streams").set(count as f64);
}

pub fn tunnel_opened() {
    gauge!("relay_active_tunnels").increment(1.0);
}

pub fn tunnel_closed() {
    gauge!("relay_active_tunnels").decrement(1.0);
}

pub fn ship_connected() {
    gauge!("relay_ship_connections").increment(1.0);
}

pub fn ship_disconnected() {
    gauge!("relay_ship_connections").decrement(1.0);
}

pub fn record_stream_error(reason: &'static str) {
    counter!("relay_stream_errors_total", "reason" => reason).increment(1);
}
