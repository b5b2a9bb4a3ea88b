//! Query builders used by page refreshes.

use crate::db::{CursorMode, Query, Transaction};
use crate::error::DbResult;
use crate::models::Value;
use std::future::Future;

/// Builds the query for one page refresh on the given transaction.
///
/// Implementations prepare the statement and bind its parameters. First and
/// max results are set by the caller afterwards.
pub trait QueryBuilder: Send + Sync {
    fn build(&self, transaction: &Transaction) -> impl Future<Output = DbResult<Query>> + Send;
}

/// A fixed SQL statement with fixed parameters.
#[derive(Debug, Clone)]
pub struct SqlQueryBuilder {
    sql: String,
    params: Vec<Value>,
    cursor_mode: CursorMode,
}

impl SqlQueryBuilder {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            cursor_mode: CursorMode::default(),
        }
    }

    /// Append a positional parameter.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_cursor_mode(mut self, cursor_mode: CursorMode) -> Self {
        self.cursor_mode = cursor_mode;
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl QueryBuilder for SqlQueryBuilder {
    async fn build(&self, transaction: &Transaction) -> DbResult<Query> {
        let query = transaction
            .prepare_with(&self.sql, self.cursor_mode)
            .await?;
        for param in &self.params {
            query.bind(param.clone());
        }
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_params() {
        let builder = SqlQueryBuilder::new("SELECT * FROM t WHERE a = ? AND b = ?")
            .bind(1i64)
            .bind("x")
            .with_cursor_mode(CursorMode::Scrollable);
        assert_eq!(builder.params, vec![Value::Int(1), Value::Text("x".into())]);
        assert_eq!(builder.cursor_mode, CursorMode::Scrollable);
    }
}
