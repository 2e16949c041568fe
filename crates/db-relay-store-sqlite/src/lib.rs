// crates/db-relay-store-sqlite/src/lib.rs
// ============================================================================
// Module: DB Relay SQLite Engine
// Description: Direct-SQL backend for the relay query engine contract.
// Purpose: Expose the SQLite engine and its statement builders.
// Dependencies: db-relay-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate implements [`db_relay_core::QueryEngine`] over an embedded
//! `SQLite` file. See [`SqliteEngine`] for the pooling model and [`sql`] for
//! how validated plans become parameterized statements.

pub mod engine;
pub mod sql;

pub use engine::MAX_POOL_SIZE;
pub use engine::SqliteEngine;
pub use engine::SqliteEngineConfig;
pub use engine::SqliteEngineError;
