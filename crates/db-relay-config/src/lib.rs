// crates/db-relay-config/src/lib.rs
// ============================================================================
// Module: DB Relay Config
// Description: Configuration loading for the relay agent.
// Purpose: Expose the config model and loader.
// Dependencies: db-relay-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration comes from `db-relay.toml`, then `DB_RELAY_*` environment
//! overrides, then command-line overrides applied by the binary. Validation
//! is strict and fails closed; see [`RelayConfig::validate`].

pub mod config;

pub use config::CONFIG_ENV_VAR;
pub use config::ConfigError;
pub use config::ControllerConfig;
pub use config::EventsConfig;
pub use config::LoggingConfig;
pub use config::RelayConfig;
pub use config::SourceConfig;
pub use config::TimingConfig;
pub use config::parse_bool;
