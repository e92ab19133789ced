//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (OFFSHORE_HOST / OFFSHORE_PORT / PORT overrides)
//!     → validation.rs (semantic checks)
//!     → RelayConfig (validated, immutable)
//!     → cloned into the ship or offshore subsystems at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{apply_env_overrides, load_config, ConfigError};
pub use schema::{
    LinkConfig, ObservabilityConfig, OffshoreConfig, RelayConfig, Role, ShipConfig, TimeoutConfig,
};
