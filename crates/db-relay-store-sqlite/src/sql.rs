// crates/db-relay-store-sqlite/src/sql.rs
// ============================================================================
// Module: SQL Builder
// Description: Parameterized statement text from validated plans.
// Purpose: Keep identifier quoting and parameter order in one place.
// Dependencies: db-relay-core
// ============================================================================

//! ## Overview
//! Builders accept only validated plans, so identifier text always comes from
//! the schema registry. Identifiers are still quoted, and every value is a
//! bound `?` parameter returned alongside the text in placeholder order.

// ============================================================================
// SECTION: Imports
// ============================================================================

use db_relay_core::DeletePlan;
use db_relay_core::InsertPlan;
use db_relay_core::SelectPlan;
use db_relay_core::SqlArg;
use db_relay_core::UpdatePlan;
use db_relay_core::validate::Assignments;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Statement text with its bound arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text with `?` placeholders.
    pub sql: String,
    /// Arguments in placeholder order.
    pub args: Vec<SqlArg>,
}

// ============================================================================
// SECTION: Builders
// ============================================================================

/// Quotes an identifier, doubling embedded quotes.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Builds a `SELECT` statement.
///
/// An offset without a limit binds `LIMIT -1` so the statement stays valid.
#[must_use]
pub fn build_select(plan: &SelectPlan) -> Statement {
    let projection = if plan.columns.is_empty() {
        "*".to_string()
    } else {
        plan.columns.iter().map(|column| quote_ident(column)).collect::<Vec<_>>().join(", ")
    };
    let mut sql = format!("SELECT {projection} FROM {}", quote_ident(plan.table.name));
    let mut args = Vec::new();
    push_where(&mut sql, &mut args, &plan.filters);
    if !plan.order_by.is_empty() {
        let terms: Vec<String> = plan
            .order_by
            .iter()
            .map(|(column, direction)| format!("{} {}", quote_ident(column), direction.as_sql()))
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&terms.join(", "));
    }
    match (plan.limit, plan.offset) {
        (Some(limit), offset) => {
            sql.push_str(" LIMIT ?");
            args.push(SqlArg::Integer(limit));
            if let Some(offset) = offset {
                sql.push_str(" OFFSET ?");
                args.push(SqlArg::Integer(offset));
            }
        }
        (None, Some(offset)) => {
            sql.push_str(" LIMIT -1 OFFSET ?");
            args.push(SqlArg::Integer(offset));
        }
        (None, None) => {}
    }
    Statement {
        sql,
        args,
    }
}

/// Builds an `INSERT` statement with columns in sorted order.
#[must_use]
pub fn build_insert(plan: &InsertPlan) -> Statement {
    let columns: Vec<String> = plan.values.iter().map(|(column, _)| quote_ident(column)).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            quote_ident(plan.table.name),
            columns.join(", ")
        ),
        args: plan.values.iter().map(|(_, value)| SqlArg::from_json(value)).collect(),
    }
}

/// Builds an `UPDATE` statement; filters are never empty for a valid plan.
#[must_use]
pub fn build_update(plan: &UpdatePlan) -> Statement {
    let assignments: Vec<String> =
        plan.values.iter().map(|(column, _)| format!("{} = ?", quote_ident(column))).collect();
    let mut sql = format!("UPDATE {} SET {}", quote_ident(plan.table.name), assignments.join(", "));
    let mut args: Vec<SqlArg> = plan.values.iter().map(|(_, value)| SqlArg::from_json(value)).collect();
    push_where(&mut sql, &mut args, &plan.filters);
    Statement {
        sql,
        args,
    }
}

/// Builds a `DELETE` statement; filters are never empty for a valid plan.
#[must_use]
pub fn build_delete(plan: &DeletePlan) -> Statement {
    let mut sql = format!("DELETE FROM {}", quote_ident(plan.table.name));
    let mut args = Vec::new();
    push_where(&mut sql, &mut args, &plan.filters);
    Statement {
        sql,
        args,
    }
}

/// Appends an AND-joined equality `WHERE` clause when filters exist.
fn push_where(sql: &mut String, args: &mut Vec<SqlArg>, filters: &Assignments) {
    if filters.is_empty() {
        return;
    }
    let clauses: Vec<String> =
        filters.iter().map(|(column, _)| format!("{} = ?", quote_ident(column))).collect();
    sql.push_str(" WHERE ");
    sql.push_str(&clauses.join(" AND "));
    args.extend(filters.iter().map(|(_, value)| SqlArg::from_json(value)));
}

// ============================================================================
// SECTION: Tests
// ============================================================================
