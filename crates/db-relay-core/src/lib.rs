// crates/db-relay-core/src/lib.rs
// ============================================================================
// Module: DB Relay Core
// Description: Wire envelope, schema registry, and query engine contract.
// Purpose: Shared, I/O-free types for the relay agent and its backends.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! `db-relay-core` defines everything the relay agent and its data backends
//! agree on: the JSON [`Envelope`] exchanged with the controller, the static
//! [`SchemaRegistry`] allow-list, typed operation requests, and the
//! [`QueryEngine`] contract implemented by the direct-SQL and REST backends.
//!
//! Validation lives here as well. Every backend turns a request into a
//! validated plan (see [`validate`]) before touching storage, so an
//! identifier that is not allow-listed can never reach a backend call.
//! Security posture: controller requests are semi-trusted and must be
//! validated before execution.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod control;
pub mod engine;
pub mod protocol;
pub mod request;
pub mod rows;
pub mod schema;
pub mod validate;
pub mod value;


// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use control::OperationControl;
pub use engine::BackendMode;
pub use engine::EngineError;
pub use engine::QueryEngine;
pub use engine::QueryOutcome;
pub use engine::Row;
pub use protocol::AgentMethod;
pub use protocol::Envelope;
pub use protocol::EnvelopeType;
pub use protocol::ErrorBody;
pub use protocol::ErrorCode;
pub use request::NamedQueryRequest;
pub use request::OrderBy;
pub use request::TableDeleteRequest;
pub use request::TableInsertRequest;
pub use request::TableSelectRequest;
pub use request::TableUpdateRequest;
pub use schema::NamedQuery;
pub use schema::SchemaRegistry;
pub use schema::TableSchema;
pub use validate::DeletePlan;
pub use validate::InsertPlan;
pub use validate::SelectPlan;
pub use validate::SortDirection;
pub use validate::UpdatePlan;
pub use value::SqlArg;
