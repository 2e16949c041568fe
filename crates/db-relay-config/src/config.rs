// crates/db-relay-config/src/config.rs
// ============================================================================
// Module: Relay Agent Configuration
// Description: Configuration loading and validation for the relay agent.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: db-relay-core, serde, toml, url
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits,
//! then overlaid with `DB_RELAY_*` environment variables. A missing default
//! file is tolerated so the agent can run from environment alone; an
//! explicitly named file must exist. Missing controller credentials or an
//! unusable backend are fatal at startup.
//! Security posture: config inputs are untrusted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use db_relay_core::BackendMode;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "db-relay.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "DB_RELAY_CONFIG";
/// Maximum configuration file size in bytes.
const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum length of a token or agent id.
const MAX_CREDENTIAL_LENGTH: usize = 512;
/// Default heartbeat interval in milliseconds.
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 20_000;
/// Default reconnect delay in milliseconds.
const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
/// Default per-request timeout in milliseconds.
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
/// Default shutdown drain timeout in milliseconds.
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;
/// Default `SQLite` busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default `SQLite` connection pool size.
const DEFAULT_POOL_SIZE: usize = 5;
/// Maximum `SQLite` connection pool size.
const MAX_POOL_SIZE: usize = 64;
/// Default upstream listing page size.
const DEFAULT_API_PAGE_SIZE: u32 = 200;
/// Maximum upstream listing page size.
const MAX_API_PAGE_SIZE: u32 = 1_000;
/// Minimum heartbeat interval in milliseconds.
const MIN_HEARTBEAT_INTERVAL_MS: u64 = 100;
/// Maximum for every duration setting in milliseconds.
const MAX_DURATION_MS: u64 = 3_600_000;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Relay agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// Controller connection settings.
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Data backend settings.
    #[serde(default)]
    pub source: SourceConfig,
    /// Heartbeat, reconnect, and timeout settings.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Post-connect event announcement settings.
    #[serde(default)]
    pub events: EventsConfig,
}

/// Controller connection settings.
///
/// # Invariants
/// - All three fields are required; `url` uses `ws` or `wss`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    /// Controller websocket URL.
    #[serde(default)]
    pub url: String,
    /// Bearer token presented on dial.
    #[serde(default)]
    pub token: String,
    /// Agent identifier presented on dial and in registration.
    #[serde(default)]
    pub agent_id: String,
}

/// Data backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Backend selection; required.
    #[serde(default)]
    pub mode: Option<BackendMode>,
    /// Database file for the direct backend.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// `SQLite` busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Upstream base URL for the API backend.
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Optional upstream bearer token.
    #[serde(default)]
    pub api_token: Option<String>,
    /// Upstream listing page size.
    #[serde(default = "default_api_page_size")]
    pub api_page_size: u32,
    /// Whether mutations are permitted.
    #[serde(default)]
    pub allow_write: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            mode: None,
            db_path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            pool_size: DEFAULT_POOL_SIZE,
            api_base_url: None,
            api_token: None,
            api_page_size: DEFAULT_API_PAGE_SIZE,
            allow_write: false,
        }
    }
}

/// Timing settings, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimingConfig {
    /// Interval between keepalive pings.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Fixed delay before redialing.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Deadline for one dispatched operation.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Maximum wait for in-flight operations at shutdown.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl TimingConfig {
    /// Returns the heartbeat interval.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Returns the reconnect delay.
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Returns the shutdown drain timeout.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log every frame sent and received.
    #[serde(default)]
    pub log_traffic: bool,
    /// Append log lines to this file instead of stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Post-connect event announcement settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventsConfig {
    /// JSON side file listing promotional events.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Returns the default busy timeout.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default pool size.
const fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

/// Returns the default page size.
const fn default_api_page_size() -> u32 {
    DEFAULT_API_PAGE_SIZE
}

/// Returns the default heartbeat interval.
const fn default_heartbeat_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_MS
}

/// Returns the default reconnect delay.
const fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

/// Returns the default request timeout.
const fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

/// Returns the default shutdown timeout.
const fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

// ============================================================================
// SECTION: Loading
// ============================================================================

impl RelayConfig {
    /// Loads, overlays the process environment, and validates.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed, an
    /// environment override is malformed, or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = Self::resolve(path, |key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the file and applies environment overrides without validating.
    ///
    /// `lookup` returns the value of an environment variable. The file path
    /// comes from `path`, else [`CONFIG_ENV_VAR`], else `db-relay.toml`; only
    /// the last may be absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed, or an
    /// environment override is malformed.
    pub fn resolve(
        path: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let (resolved, explicit) = resolve_path(path, &lookup)?;
        validate_path(&resolved)?;
        let mut config = if !explicit && !resolved.exists() {
            Self::default()
        } else {
            let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
            if bytes.len() > MAX_CONFIG_FILE_SIZE {
                return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
            }
            let content = std::str::from_utf8(&bytes)
                .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
            Self::from_toml_str(content)?
        };
        config.apply_env(lookup)?;
        Ok(config)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the text is not a valid config.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Applies `DB_RELAY_*` overrides; empty values are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown source mode or a
    /// duration that is not an integer millisecond count.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(value) = get("DB_RELAY_CONTROLLER") {
            self.controller.url = value;
        }
        if let Some(value) = get("DB_RELAY_TOKEN") {
            self.controller.token = value;
        }
        if let Some(value) = get("DB_RELAY_AGENT_ID") {
            self.controller.agent_id = value;
        }
        if let Some(value) = get("DB_RELAY_SOURCE") {
            self.source.mode = Some(parse_mode(&value)?);
        }
        if let Some(value) = get("DB_RELAY_DB") {
            self.source.db_path = Some(PathBuf::from(value));
        }
        if let Some(value) = get("DB_RELAY_API_BASE_URL") {
            self.source.api_base_url = Some(value);
        }
        if let Some(value) = get("DB_RELAY_API_TOKEN") {
            self.source.api_token = Some(value);
        }
        if let Some(value) = get("DB_RELAY_ALLOW_WRITE") {
            self.source.allow_write = parse_bool(&value);
        }
        if let Some(value) = get("DB_RELAY_LOG_TRAFFIC") {
            self.logging.log_traffic = parse_bool(&value);
        }
        if let Some(value) = get("DB_RELAY_HEARTBEAT_MS") {
            self.timing.heartbeat_interval_ms = parse_millis("DB_RELAY_HEARTBEAT_MS", &value)?;
        }
        if let Some(value) = get("DB_RELAY_RECONNECT_MS") {
            self.timing.reconnect_delay_ms = parse_millis("DB_RELAY_RECONNECT_MS", &value)?;
        }
        if let Some(value) = get("DB_RELAY_TIMEOUT_MS") {
            self.timing.request_timeout_ms = parse_millis("DB_RELAY_TIMEOUT_MS", &value)?;
        }
        Ok(())
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.controller.validate()?;
        self.source.validate()?;
        self.timing.validate()?;
        if let Some(file) = &self.logging.file {
            validate_path(file)?;
        }
        if let Some(path) = &self.events.path {
            validate_path(path)?;
        }
        Ok(())
    }

    /// Returns the validated backend mode, defaulting to direct.
    #[must_use]
    pub fn mode(&self) -> BackendMode {
        self.source.mode.unwrap_or_default()
    }
}

impl ControllerConfig {
    /// Validates controller settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() || self.token.trim().is_empty() || self.agent_id.trim().is_empty() {
            return Err(ConfigError::Invalid("missing controller, token, or agent-id".to_string()));
        }
        let url = Url::parse(self.url.trim())
            .map_err(|err| ConfigError::Invalid(format!("controller.url: {err}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::Invalid("controller.url must use ws or wss".to_string()));
        }
        if self.token.len() > MAX_CREDENTIAL_LENGTH || self.agent_id.len() > MAX_CREDENTIAL_LENGTH {
            return Err(ConfigError::Invalid("controller credentials exceed max length".to_string()));
        }
        if self.token.chars().any(char::is_control) || self.agent_id.chars().any(char::is_control) {
            return Err(ConfigError::Invalid("controller credentials contain control characters".to_string()));
        }
        Ok(())
    }
}

impl SourceConfig {
    /// Validates backend settings for the selected mode.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.mode {
            None => Err(ConfigError::Invalid("source.mode is required (direct or api)".to_string())),
            Some(BackendMode::Direct) => {
                let path = self
                    .db_path
                    .as_deref()
                    .filter(|path| !path.as_os_str().is_empty())
                    .ok_or_else(|| ConfigError::Invalid("direct mode requires source.db_path".to_string()))?;
                validate_path(path)?;
                if self.pool_size == 0 || self.pool_size > MAX_POOL_SIZE {
                    return Err(ConfigError::Invalid(format!(
                        "source.pool_size must be between 1 and {MAX_POOL_SIZE}"
                    )));
                }
                validate_millis("source.busy_timeout_ms", self.busy_timeout_ms, 1)
            }
            Some(BackendMode::Api) => {
                let base = self
                    .api_base_url
                    .as_deref()
                    .map(str::trim)
                    .filter(|base| !base.is_empty())
                    .ok_or_else(|| ConfigError::Invalid("api mode requires source.api_base_url".to_string()))?;
                let url = Url::parse(base)
                    .map_err(|err| ConfigError::Invalid(format!("source.api_base_url: {err}")))?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(ConfigError::Invalid("source.api_base_url must use http or https".to_string()));
                }
                if self.api_page_size == 0 || self.api_page_size > MAX_API_PAGE_SIZE {
                    return Err(ConfigError::Invalid(format!(
                        "source.api_page_size must be between 1 and {MAX_API_PAGE_SIZE}"
                    )));
                }
                Ok(())
            }
        }
    }
}

impl TimingConfig {
    /// Validates duration bounds.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_millis("timing.heartbeat_interval_ms", self.heartbeat_interval_ms, MIN_HEARTBEAT_INTERVAL_MS)?;
        validate_millis("timing.reconnect_delay_ms", self.reconnect_delay_ms, 1)?;
        validate_millis("timing.request_timeout_ms", self.request_timeout_ms, 1)?;
        validate_millis("timing.shutdown_timeout_ms", self.shutdown_timeout_ms, 1)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Parses a boolean flag; only `1`, `true`, `TRUE`, `yes`, `YES` are true.
#[must_use]
pub fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES")
}

/// Parses a backend mode label, ignoring case and surrounding space.
fn parse_mode(value: &str) -> Result<BackendMode, ConfigError> {
    BackendMode::parse(&value.trim().to_ascii_lowercase()).ok_or_else(|| {
        ConfigError::Invalid(format!("invalid source {value:?} (expected direct or api)"))
    })
}

/// Parses an integer millisecond count.
fn parse_millis(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::Invalid(format!("{key} must be an integer millisecond count")))
}

/// Checks a duration against its floor and the global ceiling.
fn validate_millis(field: &str, value: u64, min: u64) -> Result<(), ConfigError> {
    if value < min || value > MAX_DURATION_MS {
        return Err(ConfigError::Invalid(format!(
            "{field} must be between {min} and {MAX_DURATION_MS}"
        )));
    }
    Ok(())
}

/// Resolves the config path from CLI or environment defaults.
///
/// Returns the path and whether it was named explicitly.
fn resolve_path(
    path: Option<&Path>,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<(PathBuf, bool), ConfigError> {
    if let Some(path) = path {
        return Ok((path.to_path_buf(), true));
    }
    if let Some(env_path) = lookup(CONFIG_ENV_VAR).filter(|value| !value.is_empty()) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok((PathBuf::from(env_path), true));
    }
    Ok((PathBuf::from(DEFAULT_CONFIG_NAME), false))
}

/// Validates a path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("path component too long".to_string()));
        }
    }
    Ok(())
}
