//! Schema-less result rows.

use crate::db::types::decode_row;
use crate::error::{DbError, DbResult};
use crate::models::{FromValue, Value};
use serde::Serialize;
use sqlx::any::AnyRow;

/// A positional container of column values.
///
/// Used when no record type is supplied to a query. Slots that were never
/// assigned hold [`Value::Null`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    /// Create a row with `column_count` empty slots.
    pub fn new(column_count: usize) -> Self {
        Self {
            values: vec![Value::Null; column_count],
        }
    }

    /// Decode every column of a driver row.
    pub fn from_any_row(row: &AnyRow) -> DbResult<Self> {
        Ok(Self {
            values: decode_row(row)?,
        })
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get the value at `column`.
    pub fn get(&self, column: usize) -> DbResult<&Value> {
        self.values
            .get(column)
            .ok_or_else(|| self.out_of_bounds(column))
    }

    /// Get the value at `column` converted to `T`.
    pub fn get_as<T: FromValue>(&self, column: usize) -> DbResult<T> {
        let value = self.get(column)?.clone();
        T::from_value(value).map_err(|v| {
            DbError::invalid_input(format!(
                "Column {} holds a {} value that cannot be converted to {}",
                column,
                v.type_name(),
                std::any::type_name::<T>()
            ))
        })
    }

    /// Overwrite the value at `column`.
    pub fn set(&mut self, column: usize, value: impl Into<Value>) -> DbResult<()> {
        let len = self.values.len();
        match self.values.get_mut(column) {
            Some(slot) => {
                *slot = value.into();
                Ok(())
            }
            None => Err(DbError::invalid_input(format!(
                "Column index {} out of bounds (row has {} columns)",
                column, len
            ))),
        }
    }

    /// Iterate over the column values in order.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    fn out_of_bounds(&self, column: usize) -> DbError {
        DbError::invalid_input(format!(
            "Column index {} out of bounds (row has {} columns)",
            column,
            self.values.len()
        ))
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self { values }
    }
}
