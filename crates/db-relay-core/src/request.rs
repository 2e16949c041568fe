// crates/db-relay-core/src/request.rs
// ============================================================================
// Module: Operation Requests
// Description: Typed request payloads for every data method.
// Purpose: Convert open-ended `params` into concrete structs before validation.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Request structs mirror the controller's `params` payloads. Decoding is
//! lenient about absent optional fields (and explicit `null` for maps and
//! lists) but strict about types: a `limit` that is not an integer fails to
//! decode and surfaces as `bad_params`. Map-typed fields use [`BTreeMap`] so
//! iteration order is sorted by key, which keeps generated SQL deterministic.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Column to value map used by filters and write values.
pub type ColumnValues = BTreeMap<String, Value>;

/// Parameters for the `query` method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamedQueryRequest {
    /// Named query to execute.
    pub name: String,
    /// Positional arguments bound in order.
    #[serde(deserialize_with = "null_as_default")]
    pub args: Vec<Value>,
}

/// One `ORDER BY` term.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderBy {
    /// Column to sort by.
    pub column: String,
    /// Sort descending when true.
    pub desc: bool,
}

/// Parameters for `table.select`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TableSelectRequest {
    /// Table to read.
    pub table: String,
    /// Projection; empty selects every column.
    #[serde(deserialize_with = "null_as_default")]
    pub columns: Vec<String>,
    /// Equality filters AND-joined.
    #[serde(deserialize_with = "null_as_default")]
    pub filters: ColumnValues,
    /// Sort terms applied in order.
    #[serde(deserialize_with = "null_as_default")]
    pub order_by: Vec<OrderBy>,
    /// Maximum rows to return.
    pub limit: Option<i64>,
    /// Rows to skip before the limit applies.
    pub offset: Option<i64>,
}

/// Parameters for `table.insert`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableInsertRequest {
    /// Table to write.
    pub table: String,
    /// Column values for the new row.
    #[serde(deserialize_with = "null_as_default")]
    pub values: ColumnValues,
}

/// Parameters for `table.update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableUpdateRequest {
    /// Table to write.
    pub table: String,
    /// Column values to assign.
    #[serde(deserialize_with = "null_as_default")]
    pub values: ColumnValues,
    /// Equality filters selecting rows; must be non-empty.
    #[serde(deserialize_with = "null_as_default")]
    pub filters: ColumnValues,
}

/// Parameters for `table.delete`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableDeleteRequest {
    /// Table to write.
    pub table: String,
    /// Equality filters selecting rows; must be non-empty.
    #[serde(deserialize_with = "null_as_default")]
    pub filters: ColumnValues,
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Treats an explicit JSON `null` the same as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
