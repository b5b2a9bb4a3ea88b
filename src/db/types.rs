//! Driver type mappings.
//!
//! This module converts between sqlx's `Any` driver values and our
//! [`Value`] representation.
//!
//! # Architecture
//!
//! Decoding uses a two-phase approach:
//! 1. `TypeCategory` classifies the runtime type of each column value
//! 2. A per-category decoder extracts the typed value
//!
//! Classifying the value rather than the declared column type keeps SQLite's
//! dynamic typing (an `INTEGER` column can hold text) from failing decodes.

use crate::error::{DbError, DbResult};
use crate::models::Value;
use sqlx::any::{AnyArguments, AnyRow, AnyStatement};
use sqlx::{Any, Column, Row, Statement, TypeInfo, ValueRef};

/// A sqlx query over the `Any` driver with owned arguments.
pub(crate) type AnyQuery<'q> = sqlx::query::Query<'q, Any, AnyArguments<'q>>;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Null,
    Integer,
    Float,
    Boolean,
    Text,
    Binary,
    Unknown,
}

/// Classify a driver type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower == "null" {
        return TypeCategory::Null;
    }

    // Integer types
    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    // Boolean
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    // Float types
    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "numeric"
    {
        return TypeCategory::Float;
    }

    // Binary types
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("text") || lower.contains("char") {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Row Decoding
// =============================================================================

/// Column labels of a result row, in statement order.
pub fn column_labels(row: &AnyRow) -> Vec<String> {
    row.columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect()
}

/// Decode one column of a result row into a [`Value`].
pub fn decode_column(row: &AnyRow, idx: usize) -> DbResult<Value> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let value = match categorize_type(&type_name) {
        TypeCategory::Null => Value::Null,
        TypeCategory::Integer => Value::Int(row.try_get::<i64, _>(idx)?),
        TypeCategory::Float => Value::Float(row.try_get::<f64, _>(idx)?),
        TypeCategory::Boolean => Value::Bool(row.try_get::<bool, _>(idx)?),
        TypeCategory::Binary => Value::Bytes(row.try_get::<Vec<u8>, _>(idx)?),
        TypeCategory::Text => Value::Text(row.try_get::<String, _>(idx)?),
        TypeCategory::Unknown => match row.try_get::<String, _>(idx) {
            Ok(text) => Value::Text(text),
            Err(e) => {
                return Err(DbError::internal(format!(
                    "Unsupported column type {} at index {}: {}",
                    type_name, idx, e
                )));
            }
        },
    };
    Ok(value)
}

/// Decode every column of a result row.
pub fn decode_row(row: &AnyRow) -> DbResult<Vec<Value>> {
    (0..row.columns().len())
        .map(|idx| decode_column(row, idx))
        .collect()
}

// =============================================================================
// Parameter Binding
// =============================================================================

/// Bind a parameter to an `Any` query.
pub(crate) fn bind_param<'q>(query: AnyQuery<'q>, param: Value) -> AnyQuery<'q> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(v),
        Value::Int(v) => query.bind(v),
        Value::Float(v) => query.bind(v),
        Value::Text(v) => query.bind(v),
        Value::Bytes(v) => query.bind(v),
    }
}

/// Build a query over a prepared statement with every parameter bound in order.
pub(crate) fn build_query<'q>(
    statement: &'q AnyStatement<'static>,
    params: Vec<Value>,
) -> AnyQuery<'q> {
    params
        .into_iter()
        .fold(statement.query(), |query, param| bind_param(query, param))
}
