// crates/db-relay-core/src/value.rs
// ============================================================================
// Module: Value Coercion
// Description: Conversions from JSON values to storage-native scalars.
// Purpose: Keep numeric and textual coercion identical across backends.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! JSON numbers arrive without an integer/float distinction the storage layer
//! can rely on, so integral floats collapse to integers before binding. The
//! same module renders values to their comparison text for the in-memory
//! equality filter used by the REST backend.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Number;
use serde_json::Value;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Largest magnitude an `f64` may have and still collapse to `i64` exactly.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// Text rendered for a JSON `null` in comparisons.
pub const NULL_TEXT: &str = "<nil>";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Storage-native scalar bound as a statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    /// SQL `NULL`.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
}

impl SqlArg {
    /// Coerces a JSON value into a bindable scalar.
    ///
    /// Booleans bind as `0`/`1`, integral floats as integers, and arrays or
    /// objects as their JSON text.
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(flag) => Self::Integer(i64::from(*flag)),
            Value::Number(number) => number_arg(number),
            Value::String(text) => Self::Text(text.clone()),
            Value::Array(_) | Value::Object(_) => Self::Text(value.to_string()),
        }
    }
}

impl From<&Value> for SqlArg {
    fn from(value: &Value) -> Self {
        Self::from_json(value)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Collapses a JSON number to an integer when it is integral.
fn number_arg(number: &Number) -> SqlArg {
    if let Some(int) = number.as_i64() {
        return SqlArg::Integer(int);
    }
    match number.as_f64() {
        Some(float) => integral(float).map_or(SqlArg::Real(float), SqlArg::Integer),
        None => SqlArg::Text(number.to_string()),
    }
}

/// Returns the integer equal to `float` when one exists exactly.
#[allow(clippy::cast_possible_truncation, reason = "Range and fraction are checked first.")]
fn integral(float: f64) -> Option<i64> {
    if float.is_finite() && float.fract() == 0.0 && float.abs() <= MAX_EXACT_INT {
        Some(float as i64)
    } else {
        None
    }
}

/// Reads an integer argument the way the upstream API expects it.
///
/// Numbers truncate toward zero and strings are parsed after trimming; every
/// other shape is rejected.
#[must_use]
#[allow(clippy::cast_possible_truncation, reason = "Truncation toward zero is intended.")]
pub fn value_as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number.as_f64().filter(|float| float.is_finite() && float.abs() <= MAX_EXACT_INT).map(|float| float as i64)
        }),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Renders a value to the text used for equality comparison.
///
/// Integral numbers render without a fractional part so that `17` and
/// `17.0` compare equal. `null` renders as [`NULL_TEXT`].
#[must_use]
pub fn filter_text(value: &Value) -> String {
    match value {
        Value::Null => NULL_TEXT.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => match number_arg(number) {
            SqlArg::Integer(int) => int.to_string(),
            SqlArg::Real(float) => float.to_string(),
            SqlArg::Null | SqlArg::Text(_) => number.to_string(),
        },
        Value::String(text) => text.clone(),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(filter_text).collect();
            format!("[{}]", parts.join(" "))
        }
        Value::Object(map) => {
            let parts: Vec<String> =
                map.iter().map(|(key, item)| format!("{key}:{}", filter_text(item))).collect();
            format!("map[{}]", parts.join(" "))
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
