// crates/db-relay-agent/tests/common/mod.rs
// ============================================================================
// Module: Agent Session Test Fixtures
// Description: In-process controller and scratch database for session tests.
// Purpose: Drive a real agent over a real websocket without external services.
// ============================================================================

#![allow(dead_code, reason = "Not every test binary uses every fixture.")]

use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use db_relay_agent::AgentError;
use db_relay_agent::AgentLogger;
use db_relay_agent::ConnectionManager;
use db_relay_agent::ConnectionSettings;
use db_relay_agent::Dispatcher;
use db_relay_agent::EventAnnouncer;
use db_relay_agent::MemoryLogSink;
use db_relay_agent::ShutdownCoordinator;
use db_relay_config::RelayConfig;
use db_relay_core::SchemaRegistry;
use db_relay_store_sqlite::SqliteEngine;
use db_relay_store_sqlite::SqliteEngineConfig;
use futures_util::SinkExt;
use futures_util::StreamExt;
use rusqlite::Connection;
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::ErrorResponse;
use tokio_tungstenite::tungstenite::handshake::server::Request;
use tokio_tungstenite::tungstenite::handshake::server::Response;

/// Upper bound for any single wait in session tests.
pub const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// SECTION: Database
// ============================================================================

/// Scratch database that lives as long as the guard.
pub struct Database {
    pub dir: TempDir,
    pub path: PathBuf,
}

/// Creates `UserData` and `Card` with a few seed rows.
pub fn database() -> Database {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taiko.db3");
    let connection = Connection::open(&path).unwrap();
    let registry = SchemaRegistry::builtin();
    for name in ["UserData", "Card"] {
        let table = registry.table(name).unwrap();
        let columns: Vec<String> = table
            .columns
            .iter()
            .map(|column| match (name, *column) {
                ("UserData", "Baid") => "\"Baid\" INTEGER PRIMARY KEY".to_string(),
                ("Card", "AccessCode") => "\"AccessCode\" TEXT PRIMARY KEY".to_string(),
                _ => format!("\"{column}\""),
            })
            .collect();
        connection
            .execute_batch(&format!("CREATE TABLE \"{name}\" ({});", columns.join(", ")))
            .unwrap();
    }
    connection
        .execute_batch(
            "INSERT INTO UserData (Baid, MyDonName) VALUES (17, 'don');
             INSERT INTO UserData (Baid, MyDonName) VALUES (18, 'katsu');
             INSERT INTO Card (AccessCode, Baid) VALUES ('code-a', 17);",
        )
        .unwrap();
    Database {
        dir,
        path,
    }
}

/// Counts rows in `table` through a separate connection.
pub fn row_count(path: &Path, table: &str) -> i64 {
    let connection = Connection::open(path).unwrap();
    connection.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| row.get(0)).unwrap()
}

// ============================================================================
// SECTION: Controller
// ============================================================================

/// In-process controller accepting agent connections.
pub struct Controller {
    listener: TcpListener,
    addr: SocketAddr,
}

impl Controller {
    /// Binds to an ephemeral local port.
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        Self {
            listener,
            addr,
        }
    }

    /// Returns the websocket URL agents should dial.
    pub fn url(&self) -> String {
        format!("ws://{}/agent", self.addr)
    }

    /// Accepts the next agent connection.
    pub async fn accept(&self) -> Session {
        let (stream, _) = tokio::time::timeout(WAIT, self.listener.accept()).await.unwrap().unwrap();
        let mut authorization = None;
        let mut agent_id = None;
        let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let header = |name: &str| {
                request.headers().get(name).and_then(|value| value.to_str().ok()).map(str::to_string)
            };
            authorization = header("authorization");
            agent_id = header("x-agent-id");
            Ok(response)
        };
        let socket = tokio_tungstenite::accept_hdr_async(stream, callback).await.unwrap();
        Session {
            socket,
            authorization,
            agent_id,
        }
    }
}

/// One accepted agent connection, seen from the controller.
pub struct Session {
    socket: WebSocketStream<TcpStream>,
    pub authorization: Option<String>,
    pub agent_id: Option<String>,
}

impl Session {
    /// Returns the next JSON envelope, skipping control frames.
    pub async fn next_envelope(&mut self) -> Value {
        loop {
            let frame = tokio::time::timeout(WAIT, self.socket.next())
                .await
                .expect("agent frame in time")
                .expect("agent connection open")
                .expect("agent frame readable");
            match frame {
                Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                Message::Close(_) => panic!("agent closed the connection"),
                _ => {}
            }
        }
    }

    /// Sends one JSON request.
    pub async fn send(&mut self, request: &Value) {
        self.socket.send(Message::text(request.to_string())).await.unwrap();
    }

    /// Sends a request and returns the next envelope.
    pub async fn request(&mut self, request: &Value) -> Value {
        self.send(request).await;
        self.next_envelope().await
    }

    /// Waits until the agent closes the connection.
    pub async fn wait_closed(&mut self) {
        loop {
            match tokio::time::timeout(WAIT, self.socket.next()).await.expect("close in time") {
                None | Some(Ok(Message::Close(_)) | Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    }

    /// Closes the connection from the controller side.
    pub async fn close(mut self) {
        let _ = self.socket.close(None).await;
    }
}

// ============================================================================
// SECTION: Agent
// ============================================================================

/// Tunables for a test agent.
pub struct AgentOptions {
    pub allow_write: bool,
    pub heartbeat: Duration,
    pub reconnect: Duration,
    pub request_timeout: Duration,
    pub busy_timeout: Option<Duration>,
    pub events_path: Option<PathBuf>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            allow_write: false,
            heartbeat: Duration::from_secs(10),
            reconnect: Duration::from_millis(100),
            request_timeout: Duration::from_secs(5),
            busy_timeout: None,
            events_path: None,
        }
    }
}

/// Running agent plus handles to observe and stop it.
pub struct Agent {
    pub manager: Arc<ConnectionManager>,
    pub sink: Arc<MemoryLogSink>,
    pub shutdown: ShutdownCoordinator,
    cancel: watch::Sender<bool>,
    task: JoinHandle<Result<(), AgentError>>,
}

impl Agent {
    /// Signals cancellation and waits for the run loop to return.
    pub async fn stop(self) -> Result<(), AgentError> {
        self.cancel.send_replace(true);
        self.join().await
    }

    /// Waits for the run loop to return without cancelling.
    pub async fn join(self) -> Result<(), AgentError> {
        tokio::time::timeout(WAIT, self.task).await.expect("agent stopped in time").unwrap()
    }
}

/// Builds connection settings for `url` over `database`.
pub fn settings(url: &str, database: &Database, options: &AgentOptions) -> ConnectionSettings {
    let config = RelayConfig::from_toml_str(&format!(
        "[controller]\nurl = \"{url}\"\ntoken = \"secret\"\nagent_id = \"agent-1\"\n\n\
         [source]\nmode = \"direct\"\ndb_path = {path:?}\nallow_write = {write}\n",
        path = database.path.display().to_string(),
        write = options.allow_write,
    ))
    .unwrap();
    let mut settings = ConnectionSettings::from_config(&config);
    settings.heartbeat_interval = options.heartbeat;
    settings.reconnect_delay = options.reconnect;
    settings
}

/// Starts an agent against `url` with a direct engine over `database`.
pub fn start_agent(url: &str, database: &Database, options: AgentOptions) -> Agent {
    let settings = settings(url, database, &options);
    start_with_settings(settings, database, options)
}

/// Starts an agent with explicit connection settings.
pub fn start_with_settings(
    settings: ConnectionSettings,
    database: &Database,
    options: AgentOptions,
) -> Agent {
    let defaults = SqliteEngineConfig::new(&database.path);
    let busy_timeout_ms = options
        .busy_timeout
        .map_or(defaults.busy_timeout_ms, |timeout| u64::try_from(timeout.as_millis()).unwrap());
    let engine = SqliteEngine::open(
        SqliteEngineConfig {
            allow_write: options.allow_write,
            busy_timeout_ms,
            ..defaults
        },
        SchemaRegistry::builtin(),
    )
    .unwrap();
    let sink = Arc::new(MemoryLogSink::new());
    let logger = AgentLogger::new(sink.clone()).with_agent_id("agent-1").with_traffic(true);
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(engine),
        SchemaRegistry::builtin(),
        options.request_timeout,
        logger.clone(),
    ));
    let events = Arc::new(EventAnnouncer::new(options.events_path, logger.clone()));
    let shutdown = ShutdownCoordinator::new();
    let manager = Arc::new(ConnectionManager::new(
        settings,
        dispatcher,
        shutdown.clone(),
        events,
        logger,
    ));
    let (cancel, cancel_rx) = watch::channel(false);
    let runner = Arc::clone(&manager);
    let task = tokio::spawn(async move { runner.run(cancel_rx).await });
    Agent {
        manager,
        sink,
        shutdown,
        cancel,
        task,
    }
}
