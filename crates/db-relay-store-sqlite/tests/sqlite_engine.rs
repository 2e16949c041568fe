// crates/db-relay-store-sqlite/tests/sqlite_engine.rs
// ============================================================================
// Module: SQLite Engine Tests
// Description: End-to-end engine behavior against a scratch database.
// Purpose: Validate named queries, generic table operations, write gating,
//          and fail-closed validation.
// ============================================================================

//! ## Overview
//! Each test builds a fresh database file and drives [`SqliteEngine`] through
//! the `QueryEngine` contract only:
//! - Named query scenarios and argument coercion
//! - Select projection, filters, ordering, and pagination
//! - Insert/select round trip and update/delete filters
//! - Write gating and zero side effects on invalid requests

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use std::sync::Arc;
use std::thread;

use db_relay_core::EngineError;
use db_relay_core::NamedQueryRequest;
use db_relay_core::OperationControl;
use db_relay_core::QueryEngine;
use db_relay_core::QueryOutcome;
use db_relay_core::Row;
use db_relay_core::SchemaRegistry;
use db_relay_core::TableDeleteRequest;
use db_relay_core::TableInsertRequest;
use db_relay_core::TableSelectRequest;
use db_relay_core::TableUpdateRequest;
use db_relay_store_sqlite::SqliteEngine;
use db_relay_store_sqlite::SqliteEngineConfig;
use db_relay_store_sqlite::SqliteEngineError;
use serde_json::Value;
use serde_json::json;

use crate::common::engine;
use crate::common::fixture;

fn rows(outcome: QueryOutcome) -> Vec<Row> {
    match outcome {
        QueryOutcome::Rows {
            rows,
        } => rows,
        QueryOutcome::Mutation {
            ..
        } => panic!("expected rows"),
    }
}

fn select(engine: &SqliteEngine, params: Value) -> Result<Vec<Row>, EngineError> {
    let request: TableSelectRequest = serde_json::from_value(params).unwrap();
    engine.table_select(&request, &OperationControl::new()).map(rows)
}

fn named(name: &str, args: Value) -> NamedQueryRequest {
    serde_json::from_value(json!({"name": name, "args": args})).unwrap()
}

#[test]
fn get_user_by_baid_returns_the_row() {
    let fixture = fixture();
    let engine = engine(&fixture, false);
    let result = rows(engine.query_named(&named("get_user_by_baid", json!([17])), &OperationControl::new()).unwrap());
    assert_eq!(result.len(), 1);
    assert_eq!(result[0]["Baid"], json!(17));
    assert_eq!(result[0]["MyDonName"], json!("don"));
    assert_eq!(result[0].len(), SchemaRegistry::builtin().table("UserData").unwrap().columns.len());
}

#[test]
fn integral_float_arguments_bind_as_integers() {
    let fixture = fixture();
    let engine = engine(&fixture, false);
    let result =
        rows(engine.query_named(&named("list_song_best_by_baid", json!([17.0, 2.0])), &OperationControl::new()).unwrap());
    assert_eq!(result.len(), 2);
}

#[test]
fn unknown_query_is_rejected() {
    let fixture = fixture();
    let engine = engine(&fixture, true);
    let err = engine.query_named(&named("drop_everything", json!([])), &OperationControl::new()).unwrap_err();
    assert_eq!(err, EngineError::Invalid("unknown query: drop_everything".to_string()));
}

#[test]
fn write_query_is_forbidden_when_disabled() {
    let fixture = fixture();
    let engine = engine(&fixture, false);
    let err = engine.query_named(&named("update_user_name", json!(["new", 17])), &OperationControl::new()).unwrap_err();
    assert_eq!(err, EngineError::Forbidden);
    let user = select(&engine, json!({"table": "UserData", "filters": {"Baid": 17}})).unwrap();
    assert_eq!(user[0]["MyDonName"], json!("don"));
}

#[test]
fn write_query_reports_counts_when_enabled() {
    let fixture = fixture();
    let engine = engine(&fixture, true);
    let outcome = engine.query_named(&named("update_user_name", json!(["new", 17])), &OperationControl::new()).unwrap();
    assert!(matches!(outcome, QueryOutcome::Mutation { rows_affected: 1, .. }));
    let user = select(&engine, json!({"table": "UserData", "filters": {"Baid": 17}})).unwrap();
    assert_eq!(user[0]["MyDonName"], json!("new"));
}

#[test]
fn select_applies_projection_order_and_window() {
    let fixture = fixture();
    let engine = engine(&fixture, false);
    let result = select(
        &engine,
        json!({
            "table": "SongBestData",
            "columns": ["SongId", "BestScore"],
            "filters": {"Baid": 17},
            "orderBy": [{"column": "BestScore", "desc": true}],
            "limit": 2,
            "offset": 1
        }),
    )
    .unwrap();
    assert_eq!(
        Value::Array(result.into_iter().map(Value::Object).collect()),
        json!([
            {"SongId": 1, "BestScore": 900000},
            {"SongId": 3, "BestScore": 800000}
        ])
    );
}

#[test]
fn select_with_offset_only_skips_rows() {
    let fixture = fixture();
    let engine = engine(&fixture, false);
    let result = select(
        &engine,
        json!({"table": "Card", "orderBy": [{"column": "AccessCode"}], "offset": 1}),
    )
    .unwrap();
    let codes: Vec<_> = result.iter().map(|row| row["AccessCode"].clone()).collect();
    assert_eq!(codes, vec![json!("code-b"), json!("code-c")]);
}

#[test]
fn unknown_table_and_column_fail_closed() {
    let fixture = fixture();
    let engine = engine(&fixture, false);
    let err = select(&engine, json!({"table": "Nope"})).unwrap_err();
    assert_eq!(err.to_string(), "unknown table: Nope");
    let err = select(&engine, json!({"table": "Card", "filters": {"Baid\" OR 1=1 --": 1}}))
        .unwrap_err();
    assert_eq!(err.to_string(), "unknown column: Baid\" OR 1=1 --");
}

#[test]
fn insert_then_select_round_trips() {
    let fixture = fixture();
    let engine = engine(&fixture, true);
    let insert: TableInsertRequest = serde_json::from_value(json!({
        "table": "SongPlayData",
        "values": {"Baid": 17, "SongId": 44, "Score": 123456, "Crown": 2, "PlayTime": "2026-01-02"}
    }))
    .unwrap();
    let outcome = engine.table_insert(&insert, &OperationControl::new()).unwrap();
    let QueryOutcome::Mutation {
        rows_affected,
        last_insert_id,
    } = outcome
    else {
        panic!("expected mutation");
    };
    assert_eq!(rows_affected, 1);
    let id = last_insert_id.unwrap();
    let result = select(&engine, json!({"table": "SongPlayData", "filters": {"Id": id}})).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0]["Id"], json!(id));
    assert_eq!(result[0]["SongId"], json!(44));
    assert_eq!(result[0]["Score"], json!(123456));
    assert_eq!(result[0]["PlayTime"], json!("2026-01-02"));
}

#[test]
fn update_and_delete_require_filters() {
    let fixture = fixture();
    let engine = engine(&fixture, true);
    let update: TableUpdateRequest =
        serde_json::from_value(json!({"table": "Card", "values": {"Baid": 1}})).unwrap();
    assert_eq!(engine.table_update(&update, &OperationControl::new()).unwrap_err().to_string(), "update requires filters");
    let delete: TableDeleteRequest = serde_json::from_value(json!({"table": "Card"})).unwrap();
    assert_eq!(engine.table_delete(&delete, &OperationControl::new()).unwrap_err().to_string(), "delete requires filters");
    assert_eq!(select(&engine, json!({"table": "Card"})).unwrap().len(), 3);
}

#[test]
fn update_and_delete_touch_filtered_rows_only() {
    let fixture = fixture();
    let engine = engine(&fixture, true);
    let update: TableUpdateRequest = serde_json::from_value(json!({
        "table": "Card",
        "values": {"Baid": 99},
        "filters": {"AccessCode": "code-c"}
    }))
    .unwrap();
    let outcome = engine.table_update(&update, &OperationControl::new()).unwrap();
    assert_eq!(outcome.into_value(), json!({"rowsAffected": 1}));
    let delete: TableDeleteRequest =
        serde_json::from_value(json!({"table": "Card", "filters": {"Baid": 17}})).unwrap();
    assert_eq!(engine.table_delete(&delete, &OperationControl::new()).unwrap().into_value(), json!({"rowsAffected": 2}));
    let remaining = select(&engine, json!({"table": "Card"})).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0]["Baid"], json!(99));
}

#[test]
fn table_writes_are_forbidden_when_disabled() {
    let fixture = fixture();
    let engine = engine(&fixture, false);
    let insert: TableInsertRequest = serde_json::from_value(json!({
        "table": "Card",
        "values": {"AccessCode": "new", "Baid": 1}
    }))
    .unwrap();
    assert_eq!(engine.table_insert(&insert, &OperationControl::new()), Err(EngineError::Forbidden));
    let delete: TableDeleteRequest =
        serde_json::from_value(json!({"table": "Card", "filters": {"Baid": 17}})).unwrap();
    assert_eq!(engine.table_delete(&delete, &OperationControl::new()), Err(EngineError::Forbidden));
    assert_eq!(select(&engine, json!({"table": "Card"})).unwrap().len(), 3);
}

#[test]
fn invalid_insert_has_no_side_effects() {
    let fixture = fixture();
    let engine = engine(&fixture, true);
    let insert: TableInsertRequest = serde_json::from_value(json!({
        "table": "Card",
        "values": {"AccessCode": "new", "Baid": 1, "Nope": 2}
    }))
    .unwrap();
    assert_eq!(engine.table_insert(&insert, &OperationControl::new()).unwrap_err().to_string(), "unknown column: Nope");
    assert_eq!(select(&engine, json!({"table": "Card"})).unwrap().len(), 3);
}

#[test]
fn constraint_violations_surface_backend_message() {
    let fixture = fixture();
    let engine = engine(&fixture, true);
    let insert: TableInsertRequest = serde_json::from_value(json!({
        "table": "Card",
        "values": {"AccessCode": "code-a", "Baid": 1}
    }))
    .unwrap();
    let err = engine.table_insert(&insert, &OperationControl::new()).unwrap_err();
    let EngineError::Backend(message) = err else {
        panic!("expected backend error");
    };
    assert!(message.contains("UNIQUE"), "{message}");
}

#[test]
fn row_count_and_missing_file() {
    let fixture = fixture();
    let engine = engine(&fixture, false);
    assert_eq!(engine.table_row_count("UserData").unwrap(), 2);
    assert!(engine.table_row_count("Nope").is_err());

    let missing = SqliteEngineConfig::new(fixture.dir.path().join("missing.db3"));
    assert!(matches!(
        SqliteEngine::open(missing, SchemaRegistry::builtin()),
        Err(SqliteEngineError::Db(_))
    ));
    let directory = SqliteEngineConfig::new(fixture.dir.path());
    assert!(matches!(
        SqliteEngine::open(directory, SchemaRegistry::builtin()),
        Err(SqliteEngineError::Invalid(_))
    ));
}

#[test]
fn concurrent_reads_share_the_pool() {
    let fixture = fixture();
    let engine = Arc::new(engine(&fixture, false));
    let handles: Vec<_> = (0 .. 8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || select(&engine, json!({"table": "Card"})).unwrap().len())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), 3);
    }
}

#[test]
fn cancelled_operation_never_touches_the_database() {
    let fixture = fixture();
    let engine = engine(&fixture, true);
    let insert: TableInsertRequest =
        serde_json::from_value(json!({"table": "Card", "values": {"AccessCode": "code-z", "Baid": 18}})).unwrap();
    let control = OperationControl::new();
    assert!(control.cancel());
    assert_eq!(engine.table_insert(&insert, &control), Err(EngineError::Cancelled));
    assert_eq!(engine.table_row_count("Card").unwrap(), 3);
}

#[test]
fn write_cancelled_behind_a_lock_is_rolled_back() {
    let fixture = fixture();
    let config = SqliteEngineConfig {
        allow_write: true,
        busy_timeout_ms: 3_000,
        ..SqliteEngineConfig::new(&fixture.path)
    };
    let engine = Arc::new(SqliteEngine::open(config, SchemaRegistry::builtin()).unwrap());
    let locker = rusqlite::Connection::open(&fixture.path).unwrap();
    locker.execute_batch("BEGIN EXCLUSIVE").unwrap();

    let control = Arc::new(OperationControl::new());
    let writer = {
        let engine = Arc::clone(&engine);
        let control = Arc::clone(&control);
        thread::spawn(move || {
            let insert: TableInsertRequest =
                serde_json::from_value(json!({"table": "Card", "values": {"AccessCode": "code-z", "Baid": 18}}))
                    .unwrap();
            engine.table_insert(&insert, &control)
        })
    };
    thread::sleep(std::time::Duration::from_millis(100));
    assert!(control.cancel());
    locker.execute_batch("COMMIT").unwrap();
    drop(locker);

    assert_eq!(writer.join().unwrap(), Err(EngineError::Cancelled));
    assert_eq!(engine.table_row_count("Card").unwrap(), 3);
    assert!(select(&engine, json!({"table": "Card", "filters": {"AccessCode": "code-z"}})).unwrap().is_empty());
}
