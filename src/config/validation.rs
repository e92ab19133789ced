//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and value ranges (timeouts > 0, ports valid)
//! - Check that body limits fit inside a single frame
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::RelayConfig;

/// Room reserved in a frame for the HTTP head around a buffered body.
pub const HEAD_ALLOWANCE: usize = 64 * 1024;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.ship.listen_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "ship.listen_address",
            format!("not a socket address: {:?}", config.ship.listen_address),
        ));
    }
    if !is_host_port(&config.ship.offshore_address) {
        errors.push(ValidationError::new(
            "ship.offshore_address",
            format!("expected host:port, got {:?}", config.ship.offshore_address),
        ));
    }
    if config.ship.reconnect_delay_ms == 0 {
        errors.push(ValidationError::new("ship.reconnect_delay_ms", "must be greater than 0"));
    }
    if config.ship.max_connections == 0 {
        errors.push(ValidationError::new("ship.max_connections", "must be greater than 0"));
    }

    if config.offshore.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "offshore.bind_address",
            format!("not a socket address: {:?}", config.offshore.bind_address),
        ));
    }
    if config.offshore.max_connections == 0 {
        errors.push(ValidationError::new("offshore.max_connections", "must be greater than 0"));
    }

    let max_frame = config.link.max_frame_payload as usize;
    if config.link.write_queue_depth == 0 {
        errors.push(ValidationError::new("link.write_queue_depth", "must be greater than 0"));
    }
    if config.link.read_chunk_size == 0 || config.link.read_chunk_size > max_frame {
        errors.push(ValidationError::new(
            "link.read_chunk_size",
            format!("must be between 1 and link.max_frame_payload ({})", max_frame),
        ));
    }
    if config.ship.max_request_body.saturating_add(HEAD_ALLOWANCE) > max_frame {
        errors.push(ValidationError::new(
            "ship.max_request_body",
            format!(
                "must leave {} bytes of head room inside link.max_frame_payload ({})",
                HEAD_ALLOWANCE, max_frame
            ),
        ));
    }
    if config.offshore.max_response_body.saturating_add(HEAD_ALLOWANCE) > max_frame {
        errors.push(ValidationError::new(
            "offshore.max_response_body",
            format!(
                "must leave {} bytes of head room inside link.max_frame_payload ({})",
                HEAD_ALLOWANCE, max_frame
            ),
        ));
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {:?}", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_host_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&RelayConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = RelayConfig::default();
        config.ship.listen_address = "nope".into();
        config.ship.offshore_address = "relay-without-port".into();
        config.timeouts.request_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["ship.listen_address", "ship.offshore_address", "timeouts.request_secs"]
        );
    }

    #[test]
    fn body_limits_must_fit_in_a_frame() {
        let mut config = RelayConfig::default();
        config.link.max_frame_payload = 128 * 1024;
        config.link.read_chunk_size = 4096;
        config.ship.max_request_body = 128 * 1024;
        config.offshore.max_response_body = 32 * 1024;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "ship.max_request_body");
    }

    #[test]
    fn huge_body_limits_are_rejected_not_wrapped() {
        let mut config = RelayConfig::default();
        config.ship.max_request_body = usize::MAX;
        config.offshore.max_response_body = usize::MAX - 1;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["ship.max_request_body", "offshore.max_response_body"]);
    }
}
