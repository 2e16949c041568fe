// crates/db-relay-agent/src/logging.rs
// ============================================================================
// Module: Agent Logging
// Description: Structured JSON-line log events and sinks.
// Purpose: Emit agent lifecycle and traffic logs without hard dependencies.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every log line is one serialized [`LogEvent`]. Sinks decide where lines
//! go; [`AgentLogger`] stamps events with the agent id and gates traffic
//! logging. Sink failures are swallowed so logging can never break a session.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum traffic payload bytes written per log line.
pub const MAX_TRAFFIC_LOG_BYTES: usize = 2000;
/// Marker appended to truncated traffic payloads.
const TRUNCATED_MARKER: &str = "...<truncated>";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Lifecycle progress.
    Info,
    /// Recoverable failure.
    Warn,
    /// Unrecoverable failure.
    Error,
    /// Raw frame traffic.
    Traffic,
}

/// Structured log event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Severity.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: String,
    /// Agent identifier when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Request identifier when the event concerns one request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Request method when the event concerns one request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

impl LogEvent {
    /// Creates a new event with a consistent timestamp.
    #[must_use]
    pub fn new(event: &'static str, level: LogLevel, message: impl Into<String>) -> Self {
        let timestamp_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            event,
            timestamp_ms,
            level,
            message: message.into(),
            agent_id: None,
            request_id: None,
            method: None,
        }
    }

    /// Attaches request correlation fields.
    #[must_use]
    pub fn with_request(mut self, request_id: Option<&str>, method: &str) -> Self {
        self.request_id = request_id.map(str::to_string);
        self.method = Some(method.to_string());
        self
    }

    /// Attaches only the request identifier.
    #[must_use]
    pub fn with_request_id(mut self, request_id: Option<&str>) -> Self {
        self.request_id = request_id.map(str::to_string);
        self
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Destination for agent log events.
pub trait LogSink: Send + Sync {
    /// Record a log event.
    fn record(&self, event: &LogEvent);
}

/// Log sink that writes JSON lines to stderr.
pub struct StderrLogSink;

impl LogSink for StderrLogSink {
    fn record(&self, event: &LogEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Log sink that appends JSON lines to a file.
pub struct FileLogSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileLogSink {
    /// Opens the log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl LogSink for FileLogSink {
    fn record(&self, event: &LogEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op log sink.
pub struct NoopLogSink;

impl LogSink for NoopLogSink {
    fn record(&self, _event: &LogEvent) {}
}

/// Log sink that keeps events in memory.
#[derive(Default)]
pub struct MemoryLogSink {
    /// Recorded events in arrival order.
    events: Mutex<Vec<LogEvent>>,
}

impl MemoryLogSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Returns recorded events with the given identifier.
    #[must_use]
    pub fn events_named(&self, event: &str) -> Vec<LogEvent> {
        self.events().into_iter().filter(|entry| entry.event == event).collect()
    }
}

impl LogSink for MemoryLogSink {
    fn record(&self, event: &LogEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

// ============================================================================
// SECTION: Logger
// ============================================================================

/// Cloneable logger handle shared by agent components.
#[derive(Clone)]
pub struct AgentLogger {
    /// Destination sink.
    sink: Arc<dyn LogSink>,
    /// Agent identifier stamped on every event.
    agent_id: Option<String>,
    /// Whether traffic events are emitted.
    traffic: bool,
}

impl AgentLogger {
    /// Creates a logger over `sink` with traffic logging disabled.
    #[must_use]
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            agent_id: None,
            traffic: false,
        }
    }

    /// Creates a logger that drops every event.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopLogSink))
    }

    /// Stamps events with `agent_id`.
    #[must_use]
    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Enables or disables traffic events.
    #[must_use]
    pub const fn with_traffic(mut self, enabled: bool) -> Self {
        self.traffic = enabled;
        self
    }

    /// Returns true when traffic events are emitted.
    #[must_use]
    pub const fn traffic_enabled(&self) -> bool {
        self.traffic
    }

    /// Records a prepared event.
    pub fn record(&self, mut event: LogEvent) {
        if event.agent_id.is_none() {
            event.agent_id.clone_from(&self.agent_id);
        }
        self.sink.record(&event);
    }

    /// Records an info event.
    pub fn info(&self, event: &'static str, message: impl Into<String>) {
        self.record(LogEvent::new(event, LogLevel::Info, message));
    }

    /// Records a warning event.
    pub fn warn(&self, event: &'static str, message: impl Into<String>) {
        self.record(LogEvent::new(event, LogLevel::Warn, message));
    }

    /// Records an error event.
    pub fn error(&self, event: &'static str, message: impl Into<String>) {
        self.record(LogEvent::new(event, LogLevel::Error, message));
    }

    /// Records a frame as `<label> <payload>` when traffic logging is on.
    pub fn traffic(&self, label: &str, payload: &str) {
        if !self.traffic {
            return;
        }
        let message = format!("{label} {}", truncate_payload(payload));
        self.record(LogEvent::new("traffic", LogLevel::Traffic, message));
    }
}

/// Truncates a payload to [`MAX_TRAFFIC_LOG_BYTES`] on a char boundary.
#[must_use]
pub fn truncate_payload(payload: &str) -> String {
    if payload.len() <= MAX_TRAFFIC_LOG_BYTES {
        return payload.to_string();
    }
    let mut end = MAX_TRAFFIC_LOG_BYTES;
    while !payload.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{TRUNCATED_MARKER}", &payload[.. end])
}

// ============================================================================
// SECTION: Tests
// ============================================================================
