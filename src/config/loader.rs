//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use crate::config::schema::{RelayConfig, Role};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Env { var: &'static str, value: String },
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Env { var, value } => {
                write!(f, "Invalid value for {}: {:?}", var, value)
            }
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse a TOML file without validating it.
pub fn read_config(path: &Path) -> Result<RelayConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    toml::from_str(&content).map_err(ConfigError::Parse)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<RelayConfig, ConfigError> {
    let config = read_config(path)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply the deployment environment variables on top of a configuration.
///
/// - `OFFSHORE_HOST` / `OFFSHORE_PORT`: the ship's remote relay address
/// - `PORT`: the listen port of whichever role is running
///
/// `lookup` abstracts `std::env::var` so tests stay hermetic.
pub fn apply_env_overrides<F>(config: &mut RelayConfig, role: Role, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("OFFSHORE_HOST").filter(|h| !h.is_empty()) {
        config.ship.offshore_address = with_host(&config.ship.offshore_address, &host);
    }
    if let Some(port) = lookup("OFFSHORE_PORT") {
        let port = parse_port("OFFSHORE_PORT", port)?;
        config.ship.offshore_address = with_port(&config.ship.offshore_address, port);
    }
    if let Some(port) = lookup("PORT") {
        let port = parse_port("PORT", port)?;
        match role {
            Role::Ship => {
                config.ship.listen_address = with_port(&config.ship.listen_address, port);
            }
            Role::Offshore => {
                config.offshore.bind_address = with_port(&config.offshore.bind_address, port);
            }
        }
    }
    Ok(())
}

fn parse_port(var: &'static str, value: String) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|_| ConfigError::Env { var, value })
}

/// Split "host:port" at the last colon (bracketed IPv6 hosts keep theirs).
fn split_address(address: &str) -> (&str, Option<&str>) {
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !port.contains(']') => (host, Some(port)),
        _ => (address, None),
    }
}

fn with_host(address: &str, host: &str) -> String {
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    };
    match split_address(address) {
        (_, Some(port)) => format!("{}:{}", host, port),
        (_, None) => host,
    }
}

fn with_port(address: &str, port: u16) -> String {
    let (host, _) = split_address(address);
    format!("{}:{}", host, port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn offshore_host_and_port_override_remote() {
        let mut config = RelayConfig::default();
        apply_env_overrides(
            &mut config,
            Role::Ship,
            env(&[("OFFSHORE_HOST", "relay.example.net"), ("OFFSHORE_PORT", "7000")]),
        )
        .unwrap();
        assert_eq!(config.ship.offshore_address, "relay.example.net:7000");
    }

    #[test]
    fn port_targets_the_running_role() {
        let mut ship = RelayConfig::default();
        apply_env_overrides(&mut ship, Role::Ship, env(&[("PORT", "3128")])).unwrap();
        assert_eq!(ship.ship.listen_address, "0.0.0.0:3128");
        assert_eq!(ship.offshore.bind_address, "0.0.0.0:9999");

        let mut offshore = RelayConfig::default();
        apply_env_overrides(&mut offshore, Role::Offshore, env(&[("PORT", "4000")])).unwrap();
        assert_eq!(offshore.offshore.bind_address, "0.0.0.0:4000");
        assert_eq!(offshore.ship.listen_address, "0.0.0.0:8080");
    }

    #[test]
    fn ipv6_host_is_bracketed() {
        let mut config = RelayConfig::default();
        apply_env_overrides(&mut config, Role::Ship, env(&[("OFFSHORE_HOST", "::1")])).unwrap();
        assert_eq!(config.ship.offshore_address, "[::1]:9999");

        apply_env_overrides(&mut config, Role::Ship, env(&[("OFFSHORE_PORT", "1")])).unwrap();
        assert_eq!(config.ship.offshore_address, "[::1]:1");
    }

    #[test]
    fn bad_port_is_reported() {
        let mut config = RelayConfig::default();
        let err = apply_env_overrides(&mut config, Role::Ship, env(&[("PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "PORT", .. }));
    }

    #[test]
    fn load_config_reads_and_validates_file() {
        let path = std::env::temp_dir().join(format!("ship-relay-{}.toml", std::process::id()));
        fs::write(&path, "[ship]\nreconnect_delay_ms = 250\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.ship.reconnect_delay_ms, 250);

        fs::write(&path, "[ship]\nreconnect_delay_ms = 0\n").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Validation(_))));
        let _ = fs::remove_file(&path);
    }
}
