// crates/db-relay-cli/src/main.rs
// ============================================================================
// Module: DB Relay CLI Entry Point
// Description: Command dispatcher for running and diagnosing the relay agent.
// Purpose: Load configuration, build the backend, and supervise the session.
// Dependencies: clap, db-relay-agent, db-relay-config, thiserror, tokio.
// ============================================================================

//! ## Overview
//! `db-relay run` loads `db-relay.toml`, overlays environment variables and
//! command-line flags, builds the configured backend, and runs the
//! controller session until Ctrl-C or SIGTERM. On a signal it stops intake,
//! closes the connection, and waits a bounded time for in-flight work.
//! `config validate` and `db check` are offline diagnostics.
//! Security posture: configuration and flags are untrusted and validated
//! before any dial.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use db_relay_agent::AgentError;
use db_relay_agent::AgentLogger;
use db_relay_agent::ConnectionManager;
use db_relay_agent::ConnectionSettings;
use db_relay_agent::Dispatcher;
use db_relay_agent::EventAnnouncer;
use db_relay_agent::FileLogSink;
use db_relay_agent::LogSink;
use db_relay_agent::ShutdownCoordinator;
use db_relay_agent::StderrLogSink;
use db_relay_agent::build_engine;
use db_relay_config::RelayConfig;
use db_relay_core::BackendMode;
use db_relay_core::SchemaRegistry;
use db_relay_store_sqlite::SqliteEngine;
use db_relay_store_sqlite::SqliteEngineConfig;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinError;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "db-relay", version, disable_help_subcommand = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to the controller and serve requests until signalled.
    Run(RunCommand),
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Database diagnostics.
    Db {
        /// Selected database subcommand.
        #[command(subcommand)]
        command: DbCommand,
    },
}

/// Configuration for the `run` command.
#[derive(Args, Debug)]
struct RunCommand {
    /// Optional config file path (defaults to db-relay.toml or env override).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Flags that override file and environment settings.
    #[command(flatten)]
    overrides: ConfigOverrides,
}

/// Command-line overrides applied after the file and environment.
#[derive(Args, Debug, Default)]
struct ConfigOverrides {
    /// Controller websocket URL.
    #[arg(long, value_name = "URL")]
    controller: Option<String>,
    /// Agent auth token.
    #[arg(long, value_name = "TOKEN")]
    token: Option<String>,
    /// Agent identifier.
    #[arg(long, value_name = "ID")]
    agent_id: Option<String>,
    /// Data source mode: direct or api.
    #[arg(long, value_name = "MODE")]
    source: Option<String>,
    /// Path to the database file (direct mode).
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,
    /// Base URL of the upstream REST API (api mode).
    #[arg(long, value_name = "URL")]
    api_base_url: Option<String>,
    /// Bearer token for the upstream REST API.
    #[arg(long, value_name = "TOKEN")]
    api_token: Option<String>,
    /// Allow write operations.
    #[arg(long, action = ArgAction::SetTrue)]
    allow_write: bool,
    /// Log websocket traffic.
    #[arg(long, action = ArgAction::SetTrue)]
    log_traffic: bool,
    /// Heartbeat interval in milliseconds.
    #[arg(long, value_name = "MS")]
    heartbeat_ms: Option<u64>,
    /// Reconnect delay in milliseconds.
    #[arg(long, value_name = "MS")]
    reconnect_ms: Option<u64>,
    /// Per-request timeout in milliseconds.
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,
    /// Append logs to this file instead of stderr.
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
    /// Events side file announced after the first dispatch.
    #[arg(long, value_name = "PATH")]
    events: Option<PathBuf>,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate the configuration.
    Validate(ConfigValidateCommand),
}

/// Configuration for `config validate`.
#[derive(Args, Debug)]
struct ConfigValidateCommand {
    /// Optional config file path (defaults to db-relay.toml or env override).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Database subcommands.
#[derive(Subcommand, Debug)]
enum DbCommand {
    /// Open the database and report the `UserData` row count.
    Check(DbCheckCommand),
}

/// Configuration for `db check`.
#[derive(Args, Debug)]
struct DbCheckCommand {
    /// Path to the database file.
    #[arg(long, value_name = "PATH")]
    db: PathBuf,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for user-facing messages.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(command) => command_run(command).await,
        Commands::Config {
            command,
        } => command_config(&command),
        Commands::Db {
            command,
        } => command_db(&command),
    }
}

// ============================================================================
// SECTION: Run Command
// ============================================================================

/// Executes the `run` command.
async fn command_run(command: RunCommand) -> CliResult<ExitCode> {
    let mut config = RelayConfig::resolve(command.config.as_deref(), |key| std::env::var(key).ok())
        .map_err(|err| CliError::new(format!("config load failed: {err}")))?;
    command.overrides.apply(&mut config)?;
    config.validate().map_err(|err| CliError::new(format!("config load failed: {err}")))?;

    let logger = build_logger(&config)?;
    let engine_config = config.clone();
    let engine = tokio::task::spawn_blocking(move || build_engine(&engine_config))
        .await
        .map_err(|err| CliError::new(format!("backend init join failed: {err}")))?
        .map_err(|err| CliError::new(err.to_string()))?;
    logger.info("backend_ready", format!("{} backend ready", engine.mode()));

    let dispatcher = Arc::new(Dispatcher::new(
        engine,
        SchemaRegistry::builtin(),
        config.timing.request_timeout(),
        logger.clone(),
    ));
    let events = Arc::new(EventAnnouncer::new(config.events.path.clone(), logger.clone()));
    let manager = Arc::new(ConnectionManager::new(
        ConnectionSettings::from_config(&config),
        dispatcher,
        ShutdownCoordinator::new(),
        events,
        logger.clone(),
    ));

    let (cancel, cancel_rx) = watch::channel(false);
    let runner = Arc::clone(&manager);
    let mut session = tokio::spawn(async move { runner.run(cancel_rx).await });
    tokio::select! {
        joined = &mut session => return session_outcome(joined),
        signal = shutdown_signal() => signal?,
    }

    logger.info("signal_received", "shutdown signal received");
    manager.begin_shutdown();
    if !manager.wait_for_in_flight(config.timing.shutdown_timeout()).await {
        logger.warn("shutdown_timeout", "in-flight operations did not finish before timeout");
    }
    cancel.send_replace(true);
    let outcome = session_outcome(session.await);
    logger.info("stopped", "agent stopped");
    outcome
}

/// Maps the session task result onto an exit code.
fn session_outcome(joined: Result<Result<(), AgentError>, JoinError>) -> CliResult<ExitCode> {
    match joined {
        Ok(Ok(())) => Ok(ExitCode::SUCCESS),
        Ok(Err(err)) => Err(CliError::new(format!("agent exited: {err}"))),
        Err(err) => Err(CliError::new(format!("agent task failed: {err}"))),
    }
}

/// Builds the logger described by the config.
fn build_logger(config: &RelayConfig) -> CliResult<AgentLogger> {
    let sink: Arc<dyn LogSink> = match &config.logging.file {
        Some(path) => Arc::new(FileLogSink::new(path).map_err(|err| {
            CliError::new(format!("open log file {}: {err}", path.display()))
        })?),
        None => Arc::new(StderrLogSink),
    };
    Ok(AgentLogger::new(sink)
        .with_agent_id(config.controller.agent_id.clone())
        .with_traffic(config.logging.log_traffic))
}

/// Resolves when the process receives Ctrl-C or SIGTERM.
async fn shutdown_signal() -> CliResult<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::SignalKind;
        use tokio::signal::unix::signal;

        let mut terminate = signal(SignalKind::terminate())
            .map_err(|err| CliError::new(format!("install SIGTERM handler: {err}")))?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.map_err(|err| CliError::new(format!("wait for Ctrl-C: {err}")))
            }
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map_err(|err| CliError::new(format!("wait for Ctrl-C: {err}")))
    }
}

impl ConfigOverrides {
    /// Applies every provided flag on top of `config`.
    fn apply(&self, config: &mut RelayConfig) -> CliResult<()> {
        if let Some(url) = &self.controller {
            config.controller.url.clone_from(url);
        }
        if let Some(token) = &self.token {
            config.controller.token.clone_from(token);
        }
        if let Some(agent_id) = &self.agent_id {
            config.controller.agent_id.clone_from(agent_id);
        }
        if let Some(source) = &self.source {
            let mode = BackendMode::parse(&source.trim().to_ascii_lowercase()).ok_or_else(|| {
                CliError::new(format!("invalid --source {source:?} (expected direct or api)"))
            })?;
            config.source.mode = Some(mode);
        }
        if let Some(db) = &self.db {
            config.source.db_path = Some(db.clone());
        }
        if let Some(base) = &self.api_base_url {
            config.source.api_base_url = Some(base.clone());
        }
        if let Some(token) = &self.api_token {
            config.source.api_token = Some(token.clone());
        }
        if self.allow_write {
            config.source.allow_write = true;
        }
        if self.log_traffic {
            config.logging.log_traffic = true;
        }
        if let Some(ms) = self.heartbeat_ms {
            config.timing.heartbeat_interval_ms = ms;
        }
        if let Some(ms) = self.reconnect_ms {
            config.timing.reconnect_delay_ms = ms;
        }
        if let Some(ms) = self.timeout_ms {
            config.timing.request_timeout_ms = ms;
        }
        if let Some(path) = &self.log_file {
            config.logging.file = Some(path.clone());
        }
        if let Some(path) = &self.events {
            config.events.path = Some(path.clone());
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Config Command
// ============================================================================

/// Dispatches config subcommands.
fn command_config(command: &ConfigCommand) -> CliResult<ExitCode> {
    match command {
        ConfigCommand::Validate(command) => command_config_validate(command),
    }
}

/// Executes the config validation command.
fn command_config_validate(command: &ConfigValidateCommand) -> CliResult<ExitCode> {
    let config = RelayConfig::load(command.config.as_deref())
        .map_err(|err| CliError::new(format!("config load failed: {err}")))?;
    write_stdout_line(&format!(
        "config ok: {} backend, controller {}",
        config.mode(),
        config.controller.url.trim()
    ))
    .map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Db Command
// ============================================================================

/// Dispatches database subcommands.
fn command_db(command: &DbCommand) -> CliResult<ExitCode> {
    match command {
        DbCommand::Check(command) => command_db_check(command),
    }
}

/// Opens the database and reports the `UserData` row count.
fn command_db_check(command: &DbCheckCommand) -> CliResult<ExitCode> {
    let engine = SqliteEngine::open(SqliteEngineConfig::new(command.db.clone()), SchemaRegistry::builtin())
        .map_err(|err| CliError::new(format!("open db: {err}")))?;
    let count = engine
        .table_row_count("UserData")
        .map_err(|err| CliError::new(format!("count UserData: {err}")))?;
    write_stdout_line(&format!("db ok: {} ({count} UserData rows)", engine.path().display()))
        .map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output error message.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    format!("failed to write {stream}: {error}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
