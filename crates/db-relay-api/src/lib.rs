// crates/db-relay-api/src/lib.rs
// ============================================================================
// Module: DB Relay REST Engine
// Description: REST backend for the relay query engine contract.
// Purpose: Expose the API engine and its configuration.
// Dependencies: db-relay-core, reqwest
// ============================================================================

//! ## Overview
//! This crate implements [`db_relay_core::QueryEngine`] against an upstream
//! HTTP API with a coarser, document-shaped surface. See [`ApiEngine`] for
//! the endpoint mapping and the in-memory select emulation.

pub mod client;
pub mod engine;

pub use client::ApiClient;
pub use client::ApiEngineConfig;
pub use client::ApiEngineError;
pub use engine::ApiEngine;
