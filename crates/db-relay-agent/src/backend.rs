// crates/db-relay-agent/src/backend.rs
// ============================================================================
// Module: Backend Selection
// Description: Build the configured query engine.
// Purpose: Select the direct-SQL or REST backend once at process start.
// Dependencies: db-relay-api, db-relay-config, db-relay-store-sqlite
// ============================================================================

//! ## Overview
//! The dispatcher only sees `Arc<dyn QueryEngine>`; this module is the one
//! place that knows which concrete backend is active. Both constructors are
//! blocking and should run outside async worker threads.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use db_relay_api::ApiEngine;
use db_relay_api::ApiEngineConfig;
use db_relay_config::RelayConfig;
use db_relay_core::BackendMode;
use db_relay_core::QueryEngine;
use db_relay_core::SchemaRegistry;
use db_relay_store_sqlite::SqliteEngine;
use db_relay_store_sqlite::SqliteEngineConfig;

use crate::connection::AgentError;

// ============================================================================
// SECTION: Construction
// ============================================================================

/// Builds the query engine selected by `config`.
///
/// # Errors
///
/// Returns [`AgentError::Backend`] when the backend is misconfigured or the
/// database cannot be opened.
pub fn build_engine(config: &RelayConfig) -> Result<Arc<dyn QueryEngine>, AgentError> {
    let source = &config.source;
    let registry = SchemaRegistry::builtin();
    match config.mode() {
        BackendMode::Direct => {
            let path = source
                .db_path
                .clone()
                .ok_or_else(|| AgentError::Backend("db path is required".to_string()))?;
            let engine_config = SqliteEngineConfig {
                path,
                busy_timeout_ms: source.busy_timeout_ms,
                pool_size: source.pool_size,
                allow_write: source.allow_write,
            };
            let engine = SqliteEngine::open(engine_config, registry)
                .map_err(|err| AgentError::Backend(format!("open db: {err}")))?;
            Ok(Arc::new(engine))
        }
        BackendMode::Api => {
            let engine_config = ApiEngineConfig {
                base_url: source.api_base_url.clone().unwrap_or_default(),
                token: source.api_token.clone().filter(|token| !token.is_empty()),
                timeout_ms: config.timing.request_timeout_ms,
                page_size: source.api_page_size,
                allow_write: source.allow_write,
                ..ApiEngineConfig::default()
            };
            let engine = ApiEngine::new(engine_config, registry)
                .map_err(|err| AgentError::Backend(format!("configure api client: {err}")))?;
            Ok(Arc::new(engine))
        }
    }
}
