// crates/db-relay-core/src/validate.rs
// ============================================================================
// Module: Request Validation
// Description: Allow-list validation producing executable plans.
// Purpose: Reject unknown identifiers before any backend is involved.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! Each `plan_*` function checks a typed request against the
//! [`SchemaRegistry`] and returns a plan whose identifiers are the registry's
//! own `'static` strings. Backends build statements from plans only, which
//! makes the allow-list the sole source of identifier text.
//!
//! Filter and value pairs keep the sorted key order of the request maps.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;

use crate::engine::EngineError;
use crate::request::ColumnValues;
use crate::request::OrderBy;
use crate::request::TableDeleteRequest;
use crate::request::TableInsertRequest;
use crate::request::TableSelectRequest;
use crate::request::TableUpdateRequest;
use crate::schema::SchemaRegistry;
use crate::schema::TableSchema;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Validated column and value pairs in sorted column order.
pub type Assignments = Vec<(&'static str, Value)>;

/// Sort direction for one order term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl SortDirection {
    /// Returns the SQL keyword.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Validated `table.select`.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectPlan {
    /// Target table.
    pub table: &'static TableSchema,
    /// Projection; empty means every column.
    pub columns: Vec<&'static str>,
    /// Equality filters.
    pub filters: Assignments,
    /// Order terms.
    pub order_by: Vec<(&'static str, SortDirection)>,
    /// Row limit as requested.
    pub limit: Option<i64>,
    /// Row offset as requested.
    pub offset: Option<i64>,
}

impl SelectPlan {
    /// Returns the filter value for `column`, if filtered.
    #[must_use]
    pub fn filter(&self, column: &str) -> Option<&Value> {
        self.filters.iter().find(|(name, _)| *name == column).map(|(_, value)| value)
    }
}

/// Validated `table.insert`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertPlan {
    /// Target table.
    pub table: &'static TableSchema,
    /// Column values; never empty.
    pub values: Assignments,
}

impl InsertPlan {
    /// Returns the value assigned to `column`, if any.
    #[must_use]
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.values.iter().find(|(name, _)| *name == column).map(|(_, value)| value)
    }
}

/// Validated `table.update`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePlan {
    /// Target table.
    pub table: &'static TableSchema,
    /// Column assignments; never empty.
    pub values: Assignments,
    /// Equality filters; never empty.
    pub filters: Assignments,
}

/// Validated `table.delete`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletePlan {
    /// Target table.
    pub table: &'static TableSchema,
    /// Equality filters; never empty.
    pub filters: Assignments,
}

impl DeletePlan {
    /// Returns the filter value for `column`, if filtered.
    #[must_use]
    pub fn filter(&self, column: &str) -> Option<&Value> {
        self.filters.iter().find(|(name, _)| *name == column).map(|(_, value)| value)
    }
}

// ============================================================================
// SECTION: Planning
// ============================================================================

/// Validates a select request.
///
/// Checks run in order: table, projection, filters, order terms.
///
/// # Errors
///
/// Returns [`EngineError::Invalid`] naming the first unknown identifier.
pub fn plan_select(
    registry: &SchemaRegistry,
    request: &TableSelectRequest,
) -> Result<SelectPlan, EngineError> {
    let table = resolve_table(registry, &request.table)?;
    let columns = request
        .columns
        .iter()
        .map(|column| resolve_column(table, column))
        .collect::<Result<Vec<_>, _>>()?;
    let filters = resolve_pairs(table, &request.filters)?;
    let order_by = resolve_order(table, &request.order_by)?;
    Ok(SelectPlan {
        table,
        columns,
        filters,
        order_by,
        limit: request.limit,
        offset: request.offset,
    })
}

/// Validates an insert request.
///
/// # Errors
///
/// Returns [`EngineError::Invalid`] for an unknown table, empty values, or an
/// unknown column.
pub fn plan_insert(
    registry: &SchemaRegistry,
    request: &TableInsertRequest,
) -> Result<InsertPlan, EngineError> {
    let table = resolve_table(registry, &request.table)?;
    if request.values.is_empty() {
        return Err(EngineError::Invalid("insert requires values".to_string()));
    }
    let values = resolve_pairs(table, &request.values)?;
    Ok(InsertPlan {
        table,
        values,
    })
}

/// Validates an update request.
///
/// # Errors
///
/// Returns [`EngineError::Invalid`] for an unknown table, empty values or
/// filters, or an unknown column.
pub fn plan_update(
    registry: &SchemaRegistry,
    request: &TableUpdateRequest,
) -> Result<UpdatePlan, EngineError> {
    let table = resolve_table(registry, &request.table)?;
    if request.values.is_empty() {
        return Err(EngineError::Invalid("update requires values".to_string()));
    }
    let values = resolve_pairs(table, &request.values)?;
    if request.filters.is_empty() {
        return Err(EngineError::Invalid("update requires filters".to_string()));
    }
    let filters = resolve_pairs(table, &request.filters)?;
    Ok(UpdatePlan {
        table,
        values,
        filters,
    })
}

/// Validates a delete request.
///
/// # Errors
///
/// Returns [`EngineError::Invalid`] for an unknown table, empty filters, or
/// an unknown column.
pub fn plan_delete(
    registry: &SchemaRegistry,
    request: &TableDeleteRequest,
) -> Result<DeletePlan, EngineError> {
    let table = resolve_table(registry, &request.table)?;
    if request.filters.is_empty() {
        return Err(EngineError::Invalid("delete requires filters".to_string()));
    }
    let filters = resolve_pairs(table, &request.filters)?;
    Ok(DeletePlan {
        table,
        filters,
    })
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves a table name or fails with `unknown table`.
fn resolve_table(registry: &SchemaRegistry, name: &str) -> Result<&'static TableSchema, EngineError> {
    registry.table(name).ok_or_else(|| EngineError::Invalid(format!("unknown table: {name}")))
}

/// Resolves a column name or fails with `unknown column`.
fn resolve_column(table: &TableSchema, name: &str) -> Result<&'static str, EngineError> {
    table.column(name).ok_or_else(|| EngineError::Invalid(format!("unknown column: {name}")))
}

/// Resolves every key of a column map, keeping sorted key order.
fn resolve_pairs(table: &TableSchema, pairs: &ColumnValues) -> Result<Assignments, EngineError> {
    pairs
        .iter()
        .map(|(column, value)| Ok((resolve_column(table, column)?, value.clone())))
        .collect()
}

/// Resolves order terms in request order.
fn resolve_order(
    table: &TableSchema,
    order_by: &[OrderBy],
) -> Result<Vec<(&'static str, SortDirection)>, EngineError> {
    order_by
        .iter()
        .map(|term| {
            let direction = if term.desc { SortDirection::Desc } else { SortDirection::Asc };
            Ok((resolve_column(table, &term.column)?, direction))
        })
        .collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
