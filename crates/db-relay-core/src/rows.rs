// crates/db-relay-core/src/rows.rs
// ============================================================================
// Module: Row Shaping
// Description: In-memory filter, projection, and pagination over rows.
// Purpose: Emulate SQL select semantics for backends without a query language.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! Backends that fetch whole documents apply the same select semantics the
//! direct backend gets from SQL: equality filters compare rendered text (see
//! [`filter_text`]), projection picks named keys only, and pagination skips
//! `offset` rows then takes `limit`, clamped to the rows available.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Map;
use serde_json::Value;

use crate::engine::Row;
use crate::schema::TableSchema;
use crate::value::filter_text;

// ============================================================================
// SECTION: Shaping
// ============================================================================

/// Maps upstream keys onto registry column names.
///
/// Keys match columns case-insensitively; keys with no matching column are
/// dropped and columns with no matching key are `null`. The result holds
/// exactly the table's columns.
#[must_use]
pub fn canonicalize_row(table: &TableSchema, raw: Map<String, Value>) -> Row {
    let mut row: Row = table.columns.iter().map(|column| ((*column).to_string(), Value::Null)).collect();
    for (key, value) in raw {
        if let Some(column) = table.column(&key).or_else(|| table.column_ignore_case(&key)) {
            row.insert(column.to_string(), value);
        }
    }
    row
}

/// Renames upstream keys that match a registry column, keeping every key.
///
/// Unlike [`canonicalize_row`], keys with no matching column pass through
/// unchanged and absent columns are not added.
#[must_use]
pub fn canonicalize_keys(table: &TableSchema, raw: Map<String, Value>) -> Row {
    raw.into_iter()
        .map(|(key, value)| match table.column(&key).or_else(|| table.column_ignore_case(&key)) {
            Some(column) => (column.to_string(), value),
            None => (key, value),
        })
        .collect()
}

/// Keeps rows whose rendered values equal every filter's rendered value.
///
/// A `null` filter matches no row and a missing key matches no filter, the
/// same as `column = NULL` in SQL.
#[must_use]
pub fn apply_filters(rows: Vec<Row>, filters: &[(&str, Value)]) -> Vec<Row> {
    if filters.is_empty() {
        return rows;
    }
    if filters.iter().any(|(_, value)| value.is_null()) {
        return Vec::new();
    }
    let expected: Vec<(&str, String)> =
        filters.iter().map(|(column, value)| (*column, filter_text(value))).collect();
    rows.into_iter()
        .filter(|row| {
            expected.iter().all(|(column, text)| {
                row.get(*column).is_some_and(|value| !value.is_null() && filter_text(value) == *text)
            })
        })
        .collect()
}

/// Reduces each row to the named columns; missing keys become `null`.
#[must_use]
pub fn apply_projection(rows: Vec<Row>, columns: &[&str]) -> Vec<Row> {
    if columns.is_empty() {
        return rows;
    }
    rows.into_iter()
        .map(|row| {
            columns
                .iter()
                .map(|column| ((*column).to_string(), row.get(*column).cloned().unwrap_or(Value::Null)))
                .collect()
        })
        .collect()
}

/// Skips `offset` rows, then keeps at most `limit`.
///
/// Negative or absent offsets skip nothing; negative or absent limits keep
/// everything after the offset.
#[must_use]
pub fn apply_window(rows: Vec<Row>, offset: Option<i64>, limit: Option<i64>) -> Vec<Row> {
    let skip = offset.and_then(|value| usize::try_from(value).ok()).unwrap_or(0);
    let take = limit.and_then(|value| usize::try_from(value).ok()).unwrap_or(usize::MAX);
    rows.into_iter().skip(skip).take(take).collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
