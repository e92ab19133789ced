//! Structured logging setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise the crate logs at the configured
/// level and dependencies stay at `warn`.
pub fn init_logging(config: &ObservabilityConfig) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(&config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn default_filter(level: &str) -> String {
    format!("warn,ship_relay={}", level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_scopes_crate_level() {
        assert_eq!(default_filter("debug"), "warn,ship_relay=debug");
        assert!(EnvFilter::try_new(default_filter("info")).is_ok());
    }
}
