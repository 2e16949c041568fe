// crates/db-relay-agent/src/lib.rs
// ============================================================================
// Module: DB Relay Agent
// Description: Outbound controller session and request dispatch.
// Purpose: Wire the configured query engine to a remote controller.
// Dependencies: db-relay-core, db-relay-config, tokio, tokio-tungstenite
// ============================================================================

//! ## Overview
//! The agent dials a remote controller over a websocket, registers itself,
//! and answers correlated requests by running them against the configured
//! [`db_relay_core::QueryEngine`]. The [`ConnectionManager`] is the single
//! owner of the live socket; the [`Dispatcher`] turns raw frames into
//! response envelopes; the [`ShutdownCoordinator`] tracks in-flight work so
//! the process can drain before exit.
//! Security posture: controller requests are semi-trusted; every operation
//! is validated by the engine and writes are gated twice.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod backend;
pub mod connection;
pub mod dispatch;
pub mod events;
pub mod logging;
pub mod shutdown;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Agent version reported on registration and by `ping`/`version.get`.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use backend::build_engine;
pub use connection::AgentError;
pub use connection::ConnectionManager;
pub use connection::ConnectionSettings;
pub use dispatch::Dispatcher;
pub use events::EventAnnouncer;
pub use logging::AgentLogger;
pub use logging::FileLogSink;
pub use logging::LogEvent;
pub use logging::LogLevel;
pub use logging::LogSink;
pub use logging::MemoryLogSink;
pub use logging::NoopLogSink;
pub use logging::StderrLogSink;
pub use shutdown::InflightGuard;
pub use shutdown::ShutdownCoordinator;
