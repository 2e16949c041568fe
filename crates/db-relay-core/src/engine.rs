// crates/db-relay-core/src/engine.rs
// ============================================================================
// Module: Query Engine Contract
// Description: Backend-neutral operation contract and its error taxonomy.
// Purpose: Let the dispatcher drive either backend without knowing which.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`QueryEngine`] is the capability interface both data backends implement.
//! Calls are synchronous; async callers run them on a blocking pool. Each
//! operation validates against the schema registry first and executes only a
//! fully validated plan, so a failed validation never produces side effects.
//!
//! Every call carries an [`OperationControl`]. Engines stop early once it is
//! cancelled and claim [`OperationControl::begin_commit`] before making a
//! mutation durable, so a cancelled call leaves no side effect behind.
//!
//! Implementations enforce the write gate themselves even though the
//! dispatcher checks it first; no call path reaches a mutation without it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::control::OperationControl;
use crate::protocol::ErrorCode;
use crate::request::NamedQueryRequest;
use crate::request::TableDeleteRequest;
use crate::request::TableInsertRequest;
use crate::request::TableSelectRequest;
use crate::request::TableUpdateRequest;

// ============================================================================
// SECTION: Types
// ============================================================================

/// A result row keyed by column name.
pub type Row = Map<String, Value>;

/// Backend selected at process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// Embedded database file accessed directly.
    #[default]
    Direct,
    /// Upstream REST API.
    Api,
}

impl BackendMode {
    /// Returns the wire and config label for the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Api => "api",
        }
    }

    /// Parses a mode label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "direct" => Some(Self::Direct),
            "api" => Some(Self::Api),
            _ => None,
        }
    }
}

impl fmt::Display for BackendMode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Outcome of a successful operation.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// Rows produced by a read.
    Rows {
        /// Result rows in backend order.
        rows: Vec<Row>,
    },
    /// Counts produced by a write.
    Mutation {
        /// Rows changed by the statement.
        rows_affected: i64,
        /// Last inserted row id for inserts.
        last_insert_id: Option<i64>,
    },
}

impl QueryOutcome {
    /// Converts the outcome into the response `result` value.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Rows {
                rows,
            } => {
                let rows = rows.into_iter().map(Value::Object).collect();
                let mut map = Map::new();
                map.insert("rows".to_string(), Value::Array(rows));
                Value::Object(map)
            }
            Self::Mutation {
                rows_affected,
                last_insert_id,
            } => {
                let mut map = Map::new();
                map.insert("rowsAffected".to_string(), Value::from(rows_affected));
                if let Some(id) = last_insert_id {
                    map.insert("lastInsertId".to_string(), Value::from(id));
                }
                Value::Object(map)
            }
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors produced by query engines.
///
/// # Invariants
/// - Messages are deterministic for a given request so repeated invalid
///   requests yield identical responses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Request failed allow-list or shape validation.
    #[error("{0}")]
    Invalid(String),
    /// Mutation attempted while writes are disabled.
    #[error("write queries disabled")]
    Forbidden,
    /// Operation has no equivalent on the active backend.
    #[error("{0}")]
    Unsupported(String),
    /// Storage or upstream failure, forwarded verbatim.
    #[error("{0}")]
    Backend(String),
    /// Operation exceeded the per-request deadline.
    #[error("request timed out after {0}ms")]
    Timeout(u64),
    /// Caller cancelled the operation; nothing was committed.
    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Returns the wire error code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Forbidden => ErrorCode::Forbidden,
            Self::Invalid(_)
            | Self::Unsupported(_)
            | Self::Backend(_)
            | Self::Timeout(_)
            | Self::Cancelled => ErrorCode::DbError,
        }
    }

    /// Builds the error for an unregistered named query.
    #[must_use]
    pub fn unknown_query(name: &str) -> Self {
        Self::Invalid(format!("unknown query: {name}"))
    }
}

// ============================================================================
// SECTION: Contract
// ============================================================================

/// Operation contract shared by every data backend.
///
/// # Invariants
/// - Every identifier is validated against the schema registry before any
///   storage or upstream call.
/// - Mutations fail with [`EngineError::Forbidden`] when writes are disabled.
/// - Implementations are safe for concurrent use.
pub trait QueryEngine: Send + Sync {
    /// Returns which backend this engine is.
    fn mode(&self) -> BackendMode;

    /// Returns true when mutations are permitted.
    fn allow_write(&self) -> bool;

    /// Executes a registered named query.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the name is unknown, the query writes
    /// while writes are disabled, or execution fails.
    fn query_named(
        &self,
        request: &NamedQueryRequest,
        control: &OperationControl,
    ) -> Result<QueryOutcome, EngineError>;

    /// Reads rows from an allow-listed table.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when validation or execution fails.
    fn table_select(
        &self,
        request: &TableSelectRequest,
        control: &OperationControl,
    ) -> Result<QueryOutcome, EngineError>;

    /// Inserts one row into an allow-listed table.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when writes are disabled, validation fails, or
    /// execution fails.
    fn table_insert(
        &self,
        request: &TableInsertRequest,
        control: &OperationControl,
    ) -> Result<QueryOutcome, EngineError>;

    /// Updates filtered rows in an allow-listed table.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when writes are disabled, validation fails, or
    /// execution fails.
    fn table_update(
        &self,
        request: &TableUpdateRequest,
        control: &OperationControl,
    ) -> Result<QueryOutcome, EngineError>;

    /// Deletes filtered rows from an allow-listed table.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when writes are disabled, validation fails, or
    /// execution fails.
    fn table_delete(
        &self,
        request: &TableDeleteRequest,
        control: &OperationControl,
    ) -> Result<QueryOutcome, EngineError>;
}

/// Fails with [`EngineError::Forbidden`] unless writes are enabled.
///
/// # Errors
///
/// Returns [`EngineError::Forbidden`] when `allow_write` is false.
pub const fn ensure_write(allow_write: bool) -> Result<(), EngineError> {
    if allow_write { Ok(()) } else { Err(EngineError::Forbidden) }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
