// crates/db-relay-agent/src/connection.rs
// ============================================================================
// Module: Connection Manager
// Description: Outbound websocket session with register, heartbeat, and
//              reconnect supervision.
// Purpose: Own the single controller connection and pump frames through the
//          dispatcher.
// Dependencies: tokio, tokio-tungstenite, futures-util, bytes
// ============================================================================

//! ## Overview
//! [`ConnectionManager::run`] dials the controller, sends one register
//! envelope, then serves the session from a single select loop until the
//! connection fails, the caller cancels, or shutdown begins. Failed sessions
//! are retried after a fixed delay, forever.
//!
//! The socket never leaves the session loop. Dispatch runs in spawned tasks
//! and hands responses back over a channel, so reads, responses, heartbeats,
//! and the shutdown close are all serialized through one owner. Responses may
//! leave in a different order than requests arrived; the controller
//! correlates them by `id`.
//!
//! The idle-read deadline is twice the heartbeat interval and is refreshed
//! only by pong frames.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use db_relay_config::RelayConfig;
use db_relay_core::Envelope;
use futures_util::SinkExt;
use futures_util::StreamExt;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderName;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;

use crate::AGENT_VERSION;
use crate::dispatch::Dispatcher;
use crate::events::EventAnnouncer;
use crate::logging::AgentLogger;
use crate::logging::LogEvent;
use crate::logging::LogLevel;
use crate::shutdown::ShutdownCoordinator;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Header carrying the agent identifier on dial.
const AGENT_ID_HEADER: &str = "x-agent-id";
/// Payload of keepalive ping frames.
const PING_PAYLOAD: &[u8] = b"ping";
/// Capacity of the per-session response channel.
const RESPONSE_CHANNEL_CAPACITY: usize = 256;

/// Live controller socket.
type ControllerSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Agent lifecycle errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// Unusable connection settings; fatal at startup.
    #[error("{0}")]
    Config(String),
    /// Backend construction failure.
    #[error("{0}")]
    Backend(String),
    /// Dial or handshake failure.
    #[error("dial failed: {0}")]
    Dial(String),
    /// Read or write failure on an established connection.
    #[error("connection io error: {0}")]
    Io(String),
    /// Envelope serialization failure.
    #[error("encode failed: {0}")]
    Encode(String),
    /// Events side file failure.
    #[error("events file error: {0}")]
    Events(String),
}

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Connection parameters supplied at startup.
///
/// # Invariants
/// - `controller_url`, `token`, and `agent_id` are non-empty.
/// - `heartbeat_interval` is non-zero.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    /// Controller websocket URL.
    pub controller_url: String,
    /// Bearer token presented on dial.
    pub token: String,
    /// Agent identifier presented on dial and in registration.
    pub agent_id: String,
    /// Interval between keepalive pings.
    pub heartbeat_interval: Duration,
    /// Fixed delay before redialing.
    pub reconnect_delay: Duration,
    /// Capability metadata sent in the register envelope.
    pub meta: Map<String, Value>,
}

impl ConnectionSettings {
    /// Derives settings and register metadata from the agent config.
    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        let source = &config.source;
        let mut meta = Map::new();
        meta.insert("allowWrite".to_string(), Value::Bool(source.allow_write));
        meta.insert(
            "dbPath".to_string(),
            Value::String(
                source.db_path.as_ref().map(|path| path.display().to_string()).unwrap_or_default(),
            ),
        );
        meta.insert("source".to_string(), Value::String(config.mode().as_str().to_string()));
        meta.insert(
            "apiBaseUrl".to_string(),
            Value::String(source.api_base_url.clone().unwrap_or_default()),
        );
        Self {
            controller_url: config.controller.url.trim().to_string(),
            token: config.controller.token.clone(),
            agent_id: config.controller.agent_id.clone(),
            heartbeat_interval: config.timing.heartbeat_interval(),
            reconnect_delay: config.timing.reconnect_delay(),
            meta,
        }
    }

    /// Rejects settings that can never reach the controller.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] when a required field is missing.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.controller_url.is_empty() || self.token.is_empty() || self.agent_id.is_empty() {
            return Err(AgentError::Config("missing controller, token, or agent-id".to_string()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(AgentError::Config("heartbeat interval must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Builds the dial request with bearer and agent id headers.
    fn client_request(&self) -> Result<Request, AgentError> {
        let mut request = self
            .controller_url
            .as_str()
            .into_client_request()
            .map_err(|err| AgentError::Config(format!("controller url: {err}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|err| AgentError::Config(format!("token: {err}")))?;
        let agent_id = HeaderValue::from_str(&self.agent_id)
            .map_err(|err| AgentError::Config(format!("agent id: {err}")))?;
        let headers = request.headers_mut();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(HeaderName::from_static(AGENT_ID_HEADER), agent_id);
        Ok(request)
    }

    /// Builds the register envelope for a fresh connection.
    fn register_envelope(&self) -> Envelope {
        Envelope::register(self.agent_id.clone(), AGENT_VERSION, self.meta.clone())
    }
}

// ============================================================================
// SECTION: Connection Manager
// ============================================================================

/// How one session ended.
enum SessionEnd {
    /// Cancellation or shutdown; do not reconnect.
    Stopped,
    /// Connection lost; reconnect after the delay.
    Lost(String),
}

/// Owner of the controller connection.
///
/// # Invariants
/// - At most one connection is live at a time.
/// - `connected` is true only between a successful register send and the
///   end of that session.
pub struct ConnectionManager {
    /// Connection parameters.
    settings: ConnectionSettings,
    /// Request dispatcher.
    dispatcher: Arc<Dispatcher>,
    /// Shutdown flag and in-flight tracker.
    shutdown: ShutdownCoordinator,
    /// Once-per-process post-connect announcer.
    events: Arc<EventAnnouncer>,
    /// Log destination.
    logger: AgentLogger,
    /// Session state flag.
    connected: Arc<AtomicBool>,
}

impl ConnectionManager {
    /// Creates a manager; nothing is dialed until [`Self::run`].
    #[must_use]
    pub fn new(
        settings: ConnectionSettings,
        dispatcher: Arc<Dispatcher>,
        shutdown: ShutdownCoordinator,
        events: Arc<EventAnnouncer>,
        logger: AgentLogger,
    ) -> Self {
        Self {
            settings,
            dispatcher,
            shutdown,
            events,
            logger,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns true while a registered session is live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Returns the shutdown coordinator shared with dispatch tasks.
    #[must_use]
    pub const fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Stops intake, closes the live connection, and prevents reconnects.
    pub fn begin_shutdown(&self) {
        if self.shutdown.begin_shutdown() {
            self.logger.info("shutdown_started", "shutdown requested");
        }
    }

    /// Waits for dispatched operations to finish, bounded by `timeout`.
    ///
    /// Returns true when every operation finished in time.
    pub async fn wait_for_in_flight(&self, timeout: Duration) -> bool {
        self.shutdown.wait_for_in_flight(timeout).await
    }

    /// Runs the reconnect loop until `cancel` turns true or shutdown begins.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] when the settings can never connect.
    /// Connection failures are logged and retried, never returned.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> Result<(), AgentError> {
        self.settings.validate()?;
        self.settings.client_request()?;
        let mut shutdown = self.shutdown.subscribe();
        loop {
            if *cancel.borrow() || self.shutdown.is_shutting_down() {
                return Ok(());
            }
            self.logger.info("connecting", format!("connecting to {}", self.settings.controller_url));
            match self.connect_once(&mut cancel, &mut shutdown).await {
                Ok(SessionEnd::Stopped) => return Ok(()),
                Ok(SessionEnd::Lost(reason)) => {
                    self.logger.warn("connection_ended", format!("connection ended: {reason}"));
                }
                Err(err) => self.logger.warn("connection_ended", format!("connection ended: {err}")),
            }
            self.logger.info(
                "reconnecting",
                format!("reconnecting in {}ms", self.settings.reconnect_delay.as_millis()),
            );
            tokio::select! {
                () = signalled(&mut cancel) => return Ok(()),
                () = signalled(&mut shutdown) => return Ok(()),
                () = tokio::time::sleep(self.settings.reconnect_delay) => {}
            }
        }
    }

    /// Dials, registers, and serves one session.
    async fn connect_once(
        &self,
        cancel: &mut watch::Receiver<bool>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, AgentError> {
        let request = self.settings.client_request()?;
        let (mut socket, _) = tokio::select! {
            () = signalled(cancel) => return Ok(SessionEnd::Stopped),
            () = signalled(shutdown) => return Ok(SessionEnd::Stopped),
            dialed = tokio_tungstenite::connect_async(request) => {
                dialed.map_err(|err| AgentError::Dial(err.to_string()))?
            }
        };
        let register = serde_json::to_string(&self.settings.register_envelope())
            .map_err(|err| AgentError::Encode(err.to_string()))?;
        self.logger.traffic("tx register", &register);
        socket.send(Message::text(register)).await.map_err(|err| AgentError::Io(err.to_string()))?;
        self.connected.store(true, Ordering::SeqCst);
        self.logger.info("registered", format!("registered as {}", self.settings.agent_id));
        let outcome = self.serve(&mut socket, cancel, shutdown).await;
        self.connected.store(false, Ordering::SeqCst);
        let _ = socket.close(None).await;
        outcome
    }

    /// Serves an established session until it ends.
    async fn serve(
        &self,
        socket: &mut ControllerSocket,
        cancel: &mut watch::Receiver<bool>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, AgentError> {
        let heartbeat = self.settings.heartbeat_interval;
        let idle_window = heartbeat.saturating_mul(2);
        let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut read_deadline = Instant::now() + idle_window;
        let (responses_tx, mut responses_rx) = mpsc::channel::<Envelope>(RESPONSE_CHANNEL_CAPACITY);
        loop {
            tokio::select! {
                () = signalled(cancel) => return Ok(SessionEnd::Stopped),
                () = signalled(shutdown) => return Ok(SessionEnd::Stopped),
                () = tokio::time::sleep_until(read_deadline) => {
                    return Ok(SessionEnd::Lost("read deadline exceeded".to_string()));
                }
                _ = ticker.tick() => {
                    socket
                        .send(Message::Ping(Bytes::from_static(PING_PAYLOAD)))
                        .await
                        .map_err(|err| AgentError::Io(err.to_string()))?;
                }
                Some(response) = responses_rx.recv() => {
                    let payload = serde_json::to_string(&response)
                        .map_err(|err| AgentError::Encode(err.to_string()))?;
                    self.logger.traffic("tx response", &payload);
                    socket.send(Message::text(payload)).await.map_err(|err| AgentError::Io(err.to_string()))?;
                }
                frame = socket.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.route(Bytes::copy_from_slice(text.as_bytes()), &responses_tx);
                    }
                    Some(Ok(Message::Binary(data))) => self.route(data, &responses_tx),
                    Some(Ok(Message::Pong(_))) => read_deadline = Instant::now() + idle_window,
                    Some(Ok(Message::Ping(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        return Ok(SessionEnd::Lost("closed by controller".to_string()));
                    }
                    Some(Err(err)) => return Err(AgentError::Io(err.to_string())),
                },
            }
        }
    }

    /// Hands one inbound frame to a dispatch task.
    fn route(&self, frame: Bytes, responses: &mpsc::Sender<Envelope>) {
        self.logger.traffic("rx", &String::from_utf8_lossy(&frame));
        let Some(guard) = self.shutdown.try_track() else {
            self.logger.warn("frame_dropped", "shutting down; frame not dispatched");
            return;
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        let events = Arc::clone(&self.events);
        let responses = responses.clone();
        let logger = self.logger.clone();
        tokio::spawn(async move {
            if let Some(response) = dispatcher.handle(&frame, guard).await {
                events.announce_once();
                deliver(&responses, response, &logger).await;
            }
        });
    }
}

/// Queues a response for the session owner; logs it when the session is gone.
async fn deliver(responses: &mpsc::Sender<Envelope>, response: Envelope, logger: &AgentLogger) {
    if let Err(mpsc::error::SendError(dropped)) = responses.send(response).await {
        logger.record(
            LogEvent::new("response_dropped", LogLevel::Warn, "session closed before the response was sent")
                .with_request_id(dropped.id.as_deref()),
        );
    }
}

/// Resolves once the watched flag is true; pends forever if the sender is gone.
async fn signalled(flag: &mut watch::Receiver<bool>) {
    if flag.wait_for(|value| *value).await.is_err() {
        std::future::pending::<()>().await;
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
