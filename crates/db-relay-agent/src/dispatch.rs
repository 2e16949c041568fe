// crates/db-relay-agent/src/dispatch.rs
// ============================================================================
// Module: Message Dispatcher
// Description: Decode request envelopes and run them against the engine.
// Purpose: Turn one inbound frame into at most one response envelope.
// Dependencies: db-relay-core, serde_json, tokio
// ============================================================================

//! ## Overview
//! [`Dispatcher::handle`] never fails: every outcome of a request becomes a
//! response envelope carrying either `result` or `error`. Frames that are not
//! JSON, or that carry no `method`, produce no response.
//!
//! Writes are gated here before the engine is called, and again inside each
//! engine. Engine calls are blocking and run on the blocking pool under the
//! configured request timeout.
//!
//! On timeout the dispatcher cancels the operation through its
//! [`OperationControl`]. A cancelled operation never commits, and the
//! response reports the timeout. If the engine already claimed the commit,
//! the dispatcher waits for the real outcome instead. The request's
//! [`InflightGuard`] is shared with the blocking work, so the operation stays
//! in flight until the engine call really returns.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use db_relay_core::AgentMethod;
use db_relay_core::EngineError;
use db_relay_core::Envelope;
use db_relay_core::ErrorBody;
use db_relay_core::ErrorCode;
use db_relay_core::NamedQueryRequest;
use db_relay_core::OperationControl;
use db_relay_core::QueryEngine;
use db_relay_core::QueryOutcome;
use db_relay_core::SchemaRegistry;
use db_relay_core::TableDeleteRequest;
use db_relay_core::TableInsertRequest;
use db_relay_core::TableSelectRequest;
use db_relay_core::TableUpdateRequest;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::json;

use crate::AGENT_VERSION;
use crate::logging::AgentLogger;
use crate::logging::LogEvent;
use crate::logging::LogLevel;
use crate::shutdown::InflightGuard;

// ============================================================================
// SECTION: Dispatcher
// ============================================================================

/// Maps request methods onto query engine operations.
///
/// # Invariants
/// - A response always echoes the request `id`.
/// - Mutations are rejected with `forbidden` before the engine is called
///   when writes are disabled.
pub struct Dispatcher {
    /// Active query engine.
    engine: Arc<dyn QueryEngine>,
    /// Registry used for the write pre-check on named queries.
    registry: SchemaRegistry,
    /// Deadline for one engine call.
    request_timeout: Duration,
    /// Log destination.
    logger: AgentLogger,
}

impl Dispatcher {
    /// Creates a dispatcher over `engine`.
    #[must_use]
    pub fn new(
        engine: Arc<dyn QueryEngine>,
        registry: SchemaRegistry,
        request_timeout: Duration,
        logger: AgentLogger,
    ) -> Self {
        Self {
            engine,
            registry,
            request_timeout,
            logger,
        }
    }

    /// Returns true when the engine accepts mutations.
    #[must_use]
    pub fn allow_write(&self) -> bool {
        self.engine.allow_write()
    }

    /// Handles one raw frame, returning the response to send, if any.
    ///
    /// `guard` is released once both this call and any engine work it
    /// started have finished.
    pub async fn handle(&self, raw: &[u8], guard: InflightGuard) -> Option<Envelope> {
        let guard = Arc::new(guard);
        let envelope: Envelope = match serde_json::from_slice(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.logger.warn("envelope_invalid", format!("invalid envelope: {err}"));
                return None;
            }
        };
        let method = envelope.request_method()?.to_string();
        let outcome = self.dispatch(&method, envelope.params, &guard).await;
        if let Err(error) = &outcome {
            self.logger.record(
                LogEvent::new("request_failed", LogLevel::Warn, format!("{}: {}", error.code, error.message))
                    .with_request(envelope.id.as_deref(), &method),
            );
        }
        Some(Envelope::response(envelope.id, outcome))
    }

    /// Resolves `method` and runs the matching handler.
    async fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
        guard: &Arc<InflightGuard>,
    ) -> Result<Value, ErrorBody> {
        let Some(method) = AgentMethod::parse(method) else {
            return Err(ErrorBody::new(ErrorCode::UnknownMethod, "unsupported method"));
        };
        match method {
            AgentMethod::Ping => Ok(json!({ "pong": true, "version": AGENT_VERSION })),
            AgentMethod::VersionGet => Ok(json!({ "version": AGENT_VERSION })),
            AgentMethod::Query => {
                let request: NamedQueryRequest = decode_params(params)?;
                let writes = self.registry.query(&request.name).is_some_and(|query| !query.read_only);
                if writes {
                    self.ensure_write()?;
                }
                self.run(guard, move |engine, control| engine.query_named(&request, control)).await
            }
            AgentMethod::TableSelect => {
                let request: TableSelectRequest = decode_params(params)?;
                self.run(guard, move |engine, control| engine.table_select(&request, control)).await
            }
            AgentMethod::TableInsert => {
                let request: TableInsertRequest = decode_params(params)?;
                self.ensure_write()?;
                self.run(guard, move |engine, control| engine.table_insert(&request, control)).await
            }
            AgentMethod::TableUpdate => {
                let request: TableUpdateRequest = decode_params(params)?;
                self.ensure_write()?;
                self.run(guard, move |engine, control| engine.table_update(&request, control)).await
            }
            AgentMethod::TableDelete => {
                let request: TableDeleteRequest = decode_params(params)?;
                self.ensure_write()?;
                self.run(guard, move |engine, control| engine.table_delete(&request, control)).await
            }
        }
    }

    /// Rejects a mutation when writes are disabled.
    fn ensure_write(&self) -> Result<(), ErrorBody> {
        db_relay_core::engine::ensure_write(self.engine.allow_write()).map_err(|err| error_body(&err))
    }

    /// Runs a blocking engine call under the request timeout.
    ///
    /// The blocking closure holds a clone of `guard` until the engine call
    /// returns, even when the response already reported a timeout.
    async fn run<F>(&self, guard: &Arc<InflightGuard>, operation: F) -> Result<Value, ErrorBody>
    where
        F: FnOnce(&dyn QueryEngine, &OperationControl) -> Result<QueryOutcome, EngineError> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        let control = Arc::new(OperationControl::new());
        let task_control = Arc::clone(&control);
        let held = Arc::clone(guard);
        let mut task = tokio::task::spawn_blocking(move || {
            let _held = held;
            operation(engine.as_ref(), &task_control)
        });
        let outcome = match tokio::time::timeout(self.request_timeout, &mut task).await {
            Ok(joined) => joined.unwrap_or_else(|err| Err(aborted(&err))),
            Err(_) if control.cancel() => Err(EngineError::Timeout(
                u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX),
            )),
            Err(_) => {
                self.logger.info("commit_in_progress", "deadline passed during commit; awaiting outcome");
                task.await.unwrap_or_else(|err| Err(aborted(&err)))
            }
        };
        outcome.map(QueryOutcome::into_value).map_err(|err| error_body(&err))
    }
}

/// Decodes request params into the typed request for a method.
fn decode_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, ErrorBody> {
    let Some(params) = params else {
        return Err(ErrorBody::new(ErrorCode::BadParams, "missing params"));
    };
    serde_json::from_value(params).map_err(|err| ErrorBody::new(ErrorCode::BadParams, err.to_string()))
}

/// Describes a blocking task that panicked or was cancelled by the runtime.
fn aborted(err: &tokio::task::JoinError) -> EngineError {
    EngineError::Backend(format!("operation aborted: {err}"))
}

/// Converts an engine error into its wire representation.
fn error_body(error: &EngineError) -> ErrorBody {
    ErrorBody::new(error.code(), error.to_string())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
