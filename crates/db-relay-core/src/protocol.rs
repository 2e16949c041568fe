// crates/db-relay-core/src/protocol.rs
// ============================================================================
// Module: Wire Protocol
// Description: JSON envelope exchanged with the remote controller.
// Purpose: Single wire unit for register, request, and response messages.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every message on the controller connection is an [`Envelope`]. The agent
//! sends one `register` envelope per connection and one `response` envelope
//! per request; the controller sends requests (no `type`) carrying `id`,
//! `method`, and `params`. Envelopes without a `method` are notifications and
//! never produce a response.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

// ============================================================================
// SECTION: Envelope
// ============================================================================

/// Envelope kind carried in the `type` field.
///
/// # Invariants
/// - Requests from the controller omit `type` entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    /// Agent registration, sent once per connection.
    Register,
    /// Response to a correlated request.
    Response,
    /// Any other kind; tolerated on input and ignored.
    #[serde(other)]
    Unknown,
}

/// Structured error carried by a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorBody {
    /// Builds an error body from a known code.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_str().to_string(),
            message: message.into(),
        }
    }
}

/// The single wire unit exchanged with the controller.
///
/// # Invariants
/// - An envelope is never both a request (`method`) and a response
///   (`result`/`error`); the constructors below keep the two disjoint.
/// - `result` and `error` are mutually exclusive on responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Envelope kind (`register` or `response`); absent on requests.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EnvelopeType>,
    /// Correlation token echoed on responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Operation name (requests only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Operation payload (requests only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Successful outcome (responses only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failed outcome (responses only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    /// Agent identifier (register only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Agent version (register only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Capability metadata (register only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

impl Envelope {
    /// Builds the register envelope sent after each successful dial.
    #[must_use]
    pub fn register(
        agent_id: impl Into<String>,
        version: impl Into<String>,
        meta: Map<String, Value>,
    ) -> Self {
        Self {
            kind: Some(EnvelopeType::Register),
            agent_id: Some(agent_id.into()),
            version: Some(version.into()),
            meta: Some(meta),
            ..Self::default()
        }
    }

    /// Builds a response envelope correlated to `id`.
    #[must_use]
    pub fn response(id: Option<String>, outcome: Result<Value, ErrorBody>) -> Self {
        let (result, error) = match outcome {
            Ok(value) => (Some(value), None),
            Err(error) => (None, Some(error)),
        };
        Self {
            kind: Some(EnvelopeType::Response),
            id,
            result,
            error,
            ..Self::default()
        }
    }

    /// Returns the method name when this envelope is a request.
    #[must_use]
    pub fn request_method(&self) -> Option<&str> {
        self.method.as_deref().filter(|method| !method.is_empty())
    }

    /// Returns true when this envelope is a response.
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.kind == Some(EnvelopeType::Response)
    }
}

// ============================================================================
// SECTION: Error Codes
// ============================================================================

/// Error codes surfaced to the controller.
///
/// # Invariants
/// - Labels are part of the external contract and must remain stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Request payload missing or malformed.
    BadParams,
    /// Write attempted while writes are disabled.
    Forbidden,
    /// Method name not recognized.
    UnknownMethod,
    /// Validation or backend execution failure.
    DbError,
}

impl ErrorCode {
    /// Returns the wire label for the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadParams => "bad_params",
            Self::Forbidden => "forbidden",
            Self::UnknownMethod => "unknown_method",
            Self::DbError => "db_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Methods
// ============================================================================

/// Methods the agent answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentMethod {
    /// Liveness probe.
    Ping,
    /// Agent version lookup.
    VersionGet,
    /// Named query execution.
    Query,
    /// Generic table select.
    TableSelect,
    /// Generic table insert.
    TableInsert,
    /// Generic table update.
    TableUpdate,
    /// Generic table delete.
    TableDelete,
}

impl AgentMethod {
    /// Returns the wire name for the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::VersionGet => "version.get",
            Self::Query => "query",
            Self::TableSelect => "table.select",
            Self::TableInsert => "table.insert",
            Self::TableUpdate => "table.update",
            Self::TableDelete => "table.delete",
        }
    }

    /// Returns all methods in canonical order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Ping,
            Self::VersionGet,
            Self::Query,
            Self::TableSelect,
            Self::TableInsert,
            Self::TableUpdate,
            Self::TableDelete,
        ]
    }

    /// Parses a method from its wire name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "ping" => Some(Self::Ping),
            "version.get" => Some(Self::VersionGet),
            "query" => Some(Self::Query),
            "table.select" => Some(Self::TableSelect),
            "table.insert" => Some(Self::TableInsert),
            "table.update" => Some(Self::TableUpdate),
            "table.delete" => Some(Self::TableDelete),
            _ => None,
        }
    }

    /// Returns true for table methods that always mutate.
    ///
    /// Named queries are gated per query by their read-only flag instead.
    #[must_use]
    pub const fn is_table_mutation(self) -> bool {
        matches!(self, Self::TableInsert | Self::TableUpdate | Self::TableDelete)
    }
}

impl fmt::Display for AgentMethod {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
