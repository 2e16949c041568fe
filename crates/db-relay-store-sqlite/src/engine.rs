// crates/db-relay-store-sqlite/src/engine.rs
// ============================================================================
// Module: SQLite Query Engine
// Description: Direct-SQL QueryEngine over an existing SQLite database file.
// Purpose: Execute validated plans and named queries with bound parameters.
// Dependencies: db-relay-core, rusqlite, base64, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`SqliteEngine`] opens an existing database file (it never creates one)
//! through a small pool of mutex-guarded connections chosen round-robin, so
//! concurrently dispatched operations do not serialize on a single handle.
//! Every operation plans against the schema registry before a connection is
//! touched. Blob columns are returned as base64 text.
//!
//! Each mutation runs in its own `BEGIN IMMEDIATE` transaction and commits
//! only if the caller has not cancelled it. Cancellation also interrupts the
//! statement running on the connection.
//! Security posture: controller requests are semi-trusted; identifiers come
//! from the registry and values are always bound.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use db_relay_core::BackendMode;
use db_relay_core::EngineError;
use db_relay_core::NamedQueryRequest;
use db_relay_core::OperationControl;
use db_relay_core::QueryEngine;
use db_relay_core::QueryOutcome;
use db_relay_core::Row;
use db_relay_core::SchemaRegistry;
use db_relay_core::SqlArg;
use db_relay_core::TableDeleteRequest;
use db_relay_core::TableInsertRequest;
use db_relay_core::TableSelectRequest;
use db_relay_core::TableUpdateRequest;
use db_relay_core::engine::ensure_write;
use db_relay_core::validate::plan_delete;
use db_relay_core::validate::plan_insert;
use db_relay_core::validate::plan_select;
use db_relay_core::validate::plan_update;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use rusqlite::types::ValueRef;
use serde::Deserialize;
use serde_json::Number;
use serde_json::Value;
use thiserror::Error;

use crate::sql::Statement;
use crate::sql::build_delete;
use crate::sql::build_insert;
use crate::sql::build_select;
use crate::sql::build_update;
use crate::sql::quote_ident;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default connection pool size.
const DEFAULT_POOL_SIZE: usize = 5;
/// Maximum connection pool size.
pub const MAX_POOL_SIZE: usize = 64;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration for the direct-SQL engine.
///
/// # Invariants
/// - `path` must name an existing file, not a directory.
/// - `pool_size` is between 1 and [`MAX_POOL_SIZE`].
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteEngineConfig {
    /// Path to the database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Number of pooled connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Whether mutations are permitted.
    #[serde(default)]
    pub allow_write: bool,
}

impl SqliteEngineConfig {
    /// Builds a config for `path` with default tuning and writes disabled.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            pool_size: DEFAULT_POOL_SIZE,
            allow_write: false,
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default connection pool size.
const fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while opening or driving the database.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SqliteEngineError {
    /// Invalid engine configuration.
    #[error("invalid sqlite config: {0}")]
    Invalid(String),
    /// Connection pool failure.
    #[error("sqlite io error: {0}")]
    Io(String),
    /// `SQLite` engine error, message forwarded verbatim.
    #[error("{0}")]
    Db(String),
    /// Operation cancelled by the caller; the transaction was rolled back.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<SqliteEngineError> for EngineError {
    fn from(error: SqliteEngineError) -> Self {
        match error {
            SqliteEngineError::Cancelled => Self::Cancelled,
            other => Self::Backend(other.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Direct-SQL query engine.
///
/// # Invariants
/// - Each pooled connection is used by one caller at a time.
#[derive(Clone)]
pub struct SqliteEngine {
    /// Engine configuration.
    config: SqliteEngineConfig,
    /// Identifier allow-list.
    registry: SchemaRegistry,
    /// Pooled connections.
    connections: Arc<Vec<Mutex<Connection>>>,
    /// Round-robin cursor for connection selection.
    cursor: Arc<AtomicUsize>,
}

impl SqliteEngine {
    /// Opens the engine over an existing database file.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteEngineError`] when the path or pool size is invalid,
    /// the file cannot be opened, or the connectivity probe fails.
    pub fn open(
        config: SqliteEngineConfig,
        registry: SchemaRegistry,
    ) -> Result<Self, SqliteEngineError> {
        validate_db_path(&config.path)?;
        if config.pool_size == 0 || config.pool_size > MAX_POOL_SIZE {
            return Err(SqliteEngineError::Invalid(format!(
                "pool_size must be between 1 and {MAX_POOL_SIZE}"
            )));
        }
        let mut connections = Vec::with_capacity(config.pool_size);
        for _ in 0 .. config.pool_size {
            connections.push(Mutex::new(open_connection(&config)?));
        }
        let engine = Self {
            config,
            registry,
            connections: Arc::new(connections),
            cursor: Arc::new(AtomicUsize::new(0)),
        };
        engine.check_connection()?;
        Ok(engine)
    }

    /// Returns the database path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Verifies the database can execute a trivial statement.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteEngineError`] if the mutex is poisoned or the query fails.
    pub fn check_connection(&self) -> Result<(), SqliteEngineError> {
        self.with_connection(|connection| {
            connection
                .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map(|_| ())
                .map_err(|err| SqliteEngineError::Db(err.to_string()))
        })
    }

    /// Counts rows in an allow-listed table.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Invalid`] for an unknown table, or a backend
    /// error when the count fails.
    pub fn table_row_count(&self, table: &str) -> Result<i64, EngineError> {
        let schema = self
            .registry
            .table(table)
            .ok_or_else(|| EngineError::Invalid(format!("unknown table: {table}")))?;
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(schema.name));
        let count = self.with_connection(|connection| {
            connection
                .query_row(&sql, [], |row| row.get::<_, i64>(0))
                .map_err(|err| SqliteEngineError::Db(err.to_string()))
        })?;
        Ok(count)
    }

    /// Returns the next connection using round-robin selection.
    fn connection(&self) -> &Mutex<Connection> {
        let len = self.connections.len();
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
        &self.connections[index]
    }

    /// Runs `operation` with exclusive access to one pooled connection.
    fn with_connection<T>(
        &self,
        operation: impl FnOnce(&Connection) -> Result<T, SqliteEngineError>,
    ) -> Result<T, SqliteEngineError> {
        let guard = self
            .connection()
            .lock()
            .map_err(|_| SqliteEngineError::Io("sqlite connection mutex poisoned".to_string()))?;
        operation(&guard)
    }

    /// Runs `operation` on a pooled connection that `control` can interrupt.
    ///
    /// The interrupt hook is cleared before the connection returns to the
    /// pool, so a late cancel never reaches another caller's statement.
    fn with_controlled_connection<T>(
        &self,
        control: &OperationControl,
        operation: impl FnOnce(&Connection) -> Result<T, SqliteEngineError>,
    ) -> Result<T, SqliteEngineError> {
        self.with_connection(|connection| {
            if control.is_cancelled() {
                return Err(SqliteEngineError::Cancelled);
            }
            let handle = connection.get_interrupt_handle();
            control.set_interrupt(move || handle.interrupt());
            let result = operation(connection);
            control.clear_interrupt();
            match result {
                Err(_) if control.is_cancelled() => Err(SqliteEngineError::Cancelled),
                other => other,
            }
        })
    }

    /// Executes a statement that returns rows.
    fn read(&self, statement: &Statement, control: &OperationControl) -> Result<QueryOutcome, EngineError> {
        let rows = self.with_controlled_connection(control, |connection| query_rows(connection, statement))?;
        Ok(QueryOutcome::Rows {
            rows,
        })
    }

    /// Executes a mutating statement inside its own transaction.
    ///
    /// The transaction commits only after [`OperationControl::begin_commit`]
    /// succeeds; a cancelled operation is rolled back.
    fn write(
        &self,
        statement: &Statement,
        report_insert_id: bool,
        control: &OperationControl,
    ) -> Result<QueryOutcome, EngineError> {
        let (rows_affected, last_insert_id) = self.with_controlled_connection(control, |connection| {
            connection.execute_batch("BEGIN IMMEDIATE").map_err(|err| SqliteEngineError::Db(err.to_string()))?;
            let outcome = connection
                .execute(&statement.sql, params_from_iter(statement.args.iter().map(to_sql_value)))
                .map(|changed| (changed, connection.last_insert_rowid()))
                .map_err(|err| SqliteEngineError::Db(err.to_string()))
                .and_then(|counts| {
                    control.begin_commit().map_err(|_| SqliteEngineError::Cancelled)?;
                    connection
                        .execute_batch("COMMIT")
                        .map(|()| counts)
                        .map_err(|err| SqliteEngineError::Db(err.to_string()))
                });
            if outcome.is_err() && !connection.is_autocommit() {
                let _ = connection.execute_batch("ROLLBACK");
            }
            outcome
        })?;
        Ok(QueryOutcome::Mutation {
            rows_affected: i64::try_from(rows_affected).unwrap_or(i64::MAX),
            last_insert_id: report_insert_id.then_some(last_insert_id),
        })
    }
}

impl QueryEngine for SqliteEngine {
    fn mode(&self) -> BackendMode {
        BackendMode::Direct
    }

    fn allow_write(&self) -> bool {
        self.config.allow_write
    }

    fn query_named(
        &self,
        request: &NamedQueryRequest,
        control: &OperationControl,
    ) -> Result<QueryOutcome, EngineError> {
        let query =
            self.registry.query(&request.name).ok_or_else(|| EngineError::unknown_query(&request.name))?;
        if !query.read_only {
            ensure_write(self.config.allow_write)?;
        }
        let statement = Statement {
            sql: query.sql.to_string(),
            args: request.args.iter().map(SqlArg::from_json).collect(),
        };
        if query.read_only { self.read(&statement, control) } else { self.write(&statement, true, control) }
    }

    fn table_select(
        &self,
        request: &TableSelectRequest,
        control: &OperationControl,
    ) -> Result<QueryOutcome, EngineError> {
        let plan = plan_select(&self.registry, request)?;
        self.read(&build_select(&plan), control)
    }

    fn table_insert(
        &self,
        request: &TableInsertRequest,
        control: &OperationControl,
    ) -> Result<QueryOutcome, EngineError> {
        ensure_write(self.config.allow_write)?;
        let plan = plan_insert(&self.registry, request)?;
        self.write(&build_insert(&plan), true, control)
    }

    fn table_update(
        &self,
        request: &TableUpdateRequest,
        control: &OperationControl,
    ) -> Result<QueryOutcome, EngineError> {
        ensure_write(self.config.allow_write)?;
        let plan = plan_update(&self.registry, request)?;
        self.write(&build_update(&plan), false, control)
    }

    fn table_delete(
        &self,
        request: &TableDeleteRequest,
        control: &OperationControl,
    ) -> Result<QueryOutcome, EngineError> {
        ensure_write(self.config.allow_write)?;
        let plan = plan_delete(&self.registry, request)?;
        self.write(&build_delete(&plan), false, control)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Validates a database path before opening.
fn validate_db_path(path: &Path) -> Result<(), SqliteEngineError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteEngineError::Invalid("db path is required".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteEngineError::Invalid("db path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteEngineError::Invalid(
                "db path contains an overlong component".to_string(),
            ));
        }
    }
    if path.is_dir() {
        return Err(SqliteEngineError::Invalid("db path must be a file, not a directory".to_string()));
    }
    Ok(())
}

/// Opens a read-write connection without creating the file.
fn open_connection(config: &SqliteEngineConfig) -> Result<Connection, SqliteEngineError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| SqliteEngineError::Db(err.to_string()))?;
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteEngineError::Db(err.to_string()))?;
    Ok(connection)
}

/// Runs a query and collects every row as a column map.
fn query_rows(connection: &Connection, statement: &Statement) -> Result<Vec<Row>, SqliteEngineError> {
    let mut prepared =
        connection.prepare(&statement.sql).map_err(|err| SqliteEngineError::Db(err.to_string()))?;
    let columns: Vec<String> = prepared.column_names().into_iter().map(str::to_string).collect();
    let mut rows = prepared
        .query(params_from_iter(statement.args.iter().map(to_sql_value)))
        .map_err(|err| SqliteEngineError::Db(err.to_string()))?;
    let mut result = Vec::new();
    while let Some(row) = rows.next().map_err(|err| SqliteEngineError::Db(err.to_string()))? {
        let mut map = Row::new();
        for (index, column) in columns.iter().enumerate() {
            let value = row.get_ref(index).map_err(|err| SqliteEngineError::Db(err.to_string()))?;
            map.insert(column.clone(), to_json_value(value));
        }
        result.push(map);
    }
    Ok(result)
}

/// Converts a bound argument into a `rusqlite` value.
fn to_sql_value(arg: &SqlArg) -> SqlValue {
    match arg {
        SqlArg::Null => SqlValue::Null,
        SqlArg::Integer(int) => SqlValue::Integer(*int),
        SqlArg::Real(float) => SqlValue::Real(*float),
        SqlArg::Text(text) => SqlValue::Text(text.clone()),
    }
}

/// Converts a column value into JSON.
fn to_json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(int) => Value::from(int),
        ValueRef::Real(float) => Number::from_f64(float).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(STANDARD.encode(bytes)),
    }
}
