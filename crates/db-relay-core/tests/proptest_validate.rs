//! Allow-list validation property-based tests.
//!
//! ## Purpose
//! These tests feed randomized identifiers through request planning and prove
//! that anything outside the schema registry is rejected with a stable message.
//!
//! ## What is covered
//! - Unknown projection, filter, and order columns fail validation.
//! - Repeated invalid requests produce identical errors.
//! - In-memory pagination never returns more rows than requested or available.
//!
//! ## What is intentionally out of scope
//! - Statement execution (covered by the backend crates).
// crates/db-relay-core/tests/proptest_validate.rs
// ============================================================================
// Module: Validation Property-Based Tests
// Description: Fuzz-like checks for allow-list enforcement.
// Purpose: Ensure unknown identifiers fail closed without panics.
// ============================================================================

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

use db_relay_core::EngineError;
use db_relay_core::OrderBy;
use db_relay_core::Row;
use db_relay_core::SchemaRegistry;
use db_relay_core::TableDeleteRequest;
use db_relay_core::TableSelectRequest;
use db_relay_core::rows::apply_window;
use db_relay_core::validate::plan_delete;
use db_relay_core::validate::plan_select;
use proptest::prelude::*;
use serde_json::json;

fn is_card_column(name: &str) -> bool {
    SchemaRegistry::builtin().table("Card").and_then(|table| table.column(name)).is_some()
}

fn sample_rows(count: usize) -> Vec<Row> {
    (0 .. count)
        .map(|index| {
            let mut row = Row::new();
            row.insert("Baid".to_string(), json!(index));
            row
        })
        .collect()
}

proptest! {
    #[test]
    fn unknown_projection_columns_are_rejected(column in "[A-Za-z_]{1,16}") {
        prop_assume!(!is_card_column(&column));
        let request = TableSelectRequest {
            table: "Card".to_string(),
            columns: vec![column.clone()],
            ..TableSelectRequest::default()
        };
        let err = plan_select(&SchemaRegistry::builtin(), &request).unwrap_err();
        prop_assert_eq!(err, EngineError::Invalid(format!("unknown column: {column}")));
    }

    #[test]
    fn unknown_order_columns_are_rejected(column in "[A-Za-z_\"; ]{1,16}") {
        prop_assume!(!is_card_column(&column));
        let request = TableSelectRequest {
            table: "Card".to_string(),
            order_by: vec![OrderBy { column, desc: false }],
            ..TableSelectRequest::default()
        };
        prop_assert!(plan_select(&SchemaRegistry::builtin(), &request).is_err());
    }

    #[test]
    fn invalid_delete_errors_are_stable(column in ".{1,24}") {
        prop_assume!(!is_card_column(&column));
        let mut request = TableDeleteRequest {
            table: "Card".to_string(),
            ..TableDeleteRequest::default()
        };
        request.filters.insert(column, json!(1));
        let registry = SchemaRegistry::builtin();
        let first = plan_delete(&registry, &request).unwrap_err();
        let second = plan_delete(&registry, &request).unwrap_err();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn window_never_exceeds_bounds(count in 0usize .. 40, offset in -5i64 .. 50, limit in -5i64 .. 50) {
        let rows = apply_window(sample_rows(count), Some(offset), Some(limit));
        let skipped = usize::try_from(offset.max(0)).unwrap().min(count);
        let available = count - skipped;
        let expected = if limit < 0 { available } else { available.min(usize::try_from(limit).unwrap()) };
        prop_assert_eq!(rows.len(), expected);
    }
}
