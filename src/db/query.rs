//! Prepared queries and their result cursors.
//!
//! A [`Query`] is created by [`Transaction::prepare`](crate::db::Transaction::prepare)
//! and executes on the transaction's connection. It wraps one prepared
//! statement and opens its result cursor lazily, the first time a result is
//! requested. Every execution binds the current parameters onto that
//! statement; the driver reuses its server-side handle through the
//! connection's statement cache.
//!
//! # Result forms
//!
//! - [`Query::result_list`]: records mapped through a [`BindingTable`], cached
//! - [`Query::rows`]: schema-less [`Row`]s, recomputed on every call
//! - [`Query::update`]: rows affected by a mutation
//!
//! First result and max results apply to the first two forms.
//! [`Query::result_count`] ignores them.

use crate::db::connection::{SharedConnection, live_connection};
use crate::db::mapper::{BindingTable, Record, binding_table};
use crate::db::row::Row;
use crate::db::types::{build_query, column_labels};
use crate::error::{DbError, DbResult};
use crate::models::Value;
use clap::ValueEnum;
use futures_util::TryStreamExt;
use sqlx::any::{AnyRow, AnyStatement};
use sqlx::{AnyConnection, Column, Executor, Statement};
use std::any::Any;
use std::sync::{Arc, MutexGuard, PoisonError};
use tokio::sync::Mutex;
use tracing::debug;

/// How the result cursor is positioned at the first requested row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CursorMode {
    /// Stream rows and discard the leading ones one at a time.
    #[default]
    ForwardOnly,
    /// Buffer the whole result once and index into it.
    Scrollable,
}

#[derive(Debug, Clone, Default)]
struct QueryConfig {
    params: Vec<Value>,
    first_result: usize,
    max_results: Option<usize>,
    fetch_size: Option<usize>,
}

enum Cursor {
    Scrollable { rows: Vec<AnyRow> },
    ForwardOnly { row_count: Option<usize> },
}

struct CachedList {
    type_name: &'static str,
    list: Arc<dyn Any + Send + Sync>,
}

#[derive(Default)]
struct QueryState {
    cursor: Option<Cursor>,
    result_list: Option<CachedList>,
    closed: bool,
}

struct QueryInner {
    transaction_id: String,
    sql: String,
    statement: AnyStatement<'static>,
    cursor_mode: CursorMode,
    connection: SharedConnection,
    config: std::sync::Mutex<QueryConfig>,
    state: Mutex<QueryState>,
}

/// A prepared statement owned by a transaction.
///
/// Cloning is cheap; clones share the same statement, cursor and cached
/// result list.
#[derive(Clone)]
pub struct Query {
    inner: Arc<QueryInner>,
}

impl Query {
    pub(crate) fn new(
        transaction_id: &str,
        sql: &str,
        statement: AnyStatement<'static>,
        cursor_mode: CursorMode,
        connection: SharedConnection,
    ) -> Self {
        Self {
            inner: Arc::new(QueryInner {
                transaction_id: transaction_id.to_string(),
                sql: sql.to_string(),
                statement,
                cursor_mode,
                connection,
                config: std::sync::Mutex::new(QueryConfig::default()),
                state: Mutex::new(QueryState::default()),
            }),
        }
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Skip the first `first_result` rows of the result.
    pub fn set_first_result(&self, first_result: usize) -> &Self {
        self.config().first_result = first_result;
        self
    }

    /// Return at most `max_results` rows; `None` means unlimited.
    pub fn set_max_results(&self, max_results: Option<usize>) -> &Self {
        self.config().max_results = max_results;
        self
    }

    /// Append a positional parameter.
    pub fn bind(&self, value: impl Into<Value>) -> &Self {
        self.config().params.push(value.into());
        self
    }

    pub fn first_result(&self) -> usize {
        self.config().first_result
    }

    pub fn max_results(&self) -> Option<usize> {
        self.config().max_results
    }

    /// Fetch-size hint recorded when a bounded result was materialized.
    pub fn fetch_size(&self) -> Option<usize> {
        self.config().fetch_size
    }

    pub fn sql(&self) -> &str {
        &self.inner.sql
    }

    pub fn cursor_mode(&self) -> CursorMode {
        self.inner.cursor_mode
    }

    pub fn transaction_id(&self) -> &str {
        &self.inner.transaction_id
    }

    /// The prepared statement.
    pub fn statement(&self) -> &AnyStatement<'static> {
        &self.inner.statement
    }

    /// Column labels reported by the prepared statement.
    pub fn columns(&self) -> Vec<String> {
        self.inner
            .statement
            .columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect()
    }

    pub(crate) fn same_as(&self, other: &Query) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // =========================================================================
    // Results
    // =========================================================================

    /// Materialize the result as records of type `T`.
    ///
    /// The first call executes the statement, skips `first_result` rows and
    /// maps at most `max_results` rows. The list is cached: later calls return
    /// the same `Arc` without touching the database, even after configuration
    /// changes.
    pub async fn result_list<T: Record>(&self) -> DbResult<Arc<Vec<T>>> {
        let mut state = self.inner.state.lock().await;

        if let Some(cached) = &state.result_list {
            return Arc::clone(&cached.list)
                .downcast::<Vec<T>>()
                .map_err(|_| {
                    DbError::invalid_input(format!(
                        "Result list already materialized as {}, cannot read it as {}",
                        cached.type_name,
                        std::any::type_name::<T>()
                    ))
                });
        }
        self.ensure_open(&state)?;

        // Built from the labels of the first row the cursor yields
        let mut table: Option<Arc<BindingTable<T>>> = None;
        let records = self
            .materialize(&mut state, true, |row| {
                table
                    .get_or_insert_with(|| binding_table::<T>(&column_labels(row)))
                    .map_row(row)
            })
            .await?;

        let list = Arc::new(records);
        state.result_list = Some(CachedList {
            type_name: std::any::type_name::<T>(),
            list: Arc::clone(&list) as Arc<dyn Any + Send + Sync>,
        });
        Ok(list)
    }

    /// Materialize the result as schema-less rows. Not cached.
    pub async fn rows(&self) -> DbResult<Vec<Row>> {
        let mut state = self.inner.state.lock().await;
        self.ensure_open(&state)?;
        self.materialize(&mut state, false, Row::from_any_row).await
    }

    /// Execute the statement as a mutation and return the rows affected.
    pub async fn update(&self) -> DbResult<u64> {
        let state = self.inner.state.lock().await;
        self.ensure_open(&state)?;
        let params = self.config().params.clone();

        let mut slot = self.inner.connection.lock().await;
        let conn = live_connection(&mut slot, &self.inner.transaction_id)?;
        let result = (&mut *conn)
            .execute(build_query(&self.inner.statement, params))
            .await?;

        debug!(
            transaction_id = %self.inner.transaction_id,
            sql = %self.inner.sql,
            rows = result.rows_affected(),
            "Update executed"
        );
        Ok(result.rows_affected())
    }

    /// Total number of rows the statement yields, ignoring first and max
    /// results.
    pub async fn result_count(&self) -> DbResult<usize> {
        let mut state = self.inner.state.lock().await;
        self.ensure_open(&state)?;

        if let Some(Cursor::ForwardOnly {
            row_count: Some(count),
        }) = &state.cursor
        {
            return Ok(*count);
        }

        let params = self.config().params.clone();
        let mut slot = self.inner.connection.lock().await;
        let conn = live_connection(&mut slot, &self.inner.transaction_id)?;

        let count = match self.inner.cursor_mode {
            CursorMode::Scrollable => {
                buffered_rows(&mut state, conn, &self.inner.statement, params)
                    .await?
                    .len()
            }
            CursorMode::ForwardOnly => {
                let query = build_query(&self.inner.statement, params);
                let mut stream = (&mut *conn).fetch(query);
                let mut count = 0;
                while stream.try_next().await?.is_some() {
                    count += 1;
                }
                state.cursor = Some(Cursor::ForwardOnly {
                    row_count: Some(count),
                });
                count
            }
        };

        debug!(
            transaction_id = %self.inner.transaction_id,
            sql = %self.inner.sql,
            count,
            "Result counted"
        );
        Ok(count)
    }

    /// Run `f` over the raw driver rows of the whole result.
    pub async fn with_result_set<R>(&self, f: impl FnOnce(&[AnyRow]) -> R) -> DbResult<R> {
        let mut state = self.inner.state.lock().await;
        self.ensure_open(&state)?;

        let params = self.config().params.clone();
        let mut slot = self.inner.connection.lock().await;
        let conn = live_connection(&mut slot, &self.inner.transaction_id)?;

        match self.inner.cursor_mode {
            CursorMode::Scrollable => {
                let rows =
                    buffered_rows(&mut state, conn, &self.inner.statement, params).await?;
                Ok(f(rows))
            }
            CursorMode::ForwardOnly => {
                let rows = (&mut *conn)
                    .fetch_all(build_query(&self.inner.statement, params))
                    .await?;
                Ok(f(&rows))
            }
        }
    }

    /// Release the cursor, then the statement. Later operations fail, except
    /// reading an already cached result list.
    pub async fn close(&self) {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return;
        }
        state.cursor = None;
        state.closed = true;
        debug!(
            transaction_id = %self.inner.transaction_id,
            sql = %self.inner.sql,
            "Query closed"
        );
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.state.lock().await.closed
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn config(&self) -> MutexGuard<'_, QueryConfig> {
        self.inner
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self, state: &QueryState) -> DbResult<()> {
        if state.closed {
            return Err(DbError::transaction(
                format!("Query is closed: {}", self.inner.sql),
                &self.inner.transaction_id,
            ));
        }
        Ok(())
    }

    /// Execute (or reuse the buffered cursor), position at the first result
    /// and map up to max results rows.
    async fn materialize<R, F>(
        &self,
        state: &mut QueryState,
        record_fetch_size: bool,
        mut map: F,
    ) -> DbResult<Vec<R>>
    where
        R: Send,
        F: FnMut(&AnyRow) -> DbResult<R> + Send,
    {
        let QueryConfig {
            params,
            first_result,
            max_results,
            ..
        } = {
            let mut config = self.config();
            if record_fetch_size && config.max_results.is_some() {
                config.fetch_size = config.max_results;
            }
            config.clone()
        };
        let limit = max_results.unwrap_or(usize::MAX);

        let mut slot = self.inner.connection.lock().await;
        let conn = live_connection(&mut slot, &self.inner.transaction_id)?;

        let records = match self.inner.cursor_mode {
            CursorMode::Scrollable => {
                let rows = buffered_rows(state, conn, &self.inner.statement, params).await?;
                rows.iter()
                    .skip(first_result)
                    .take(limit)
                    .map(&mut map)
                    .collect::<DbResult<Vec<R>>>()?
            }
            CursorMode::ForwardOnly => {
                let query = build_query(&self.inner.statement, params);
                let mut stream = (&mut *conn).fetch(query);
                let mut records = Vec::new();
                let mut position = 0;
                while records.len() < limit {
                    let Some(row) = stream.try_next().await? else {
                        break;
                    };
                    if position >= first_result {
                        records.push(map(&row)?);
                    }
                    position += 1;
                }
                if state.cursor.is_none() {
                    state.cursor = Some(Cursor::ForwardOnly { row_count: None });
                }
                records
            }
        };

        debug!(
            transaction_id = %self.inner.transaction_id,
            sql = %self.inner.sql,
            first_result,
            max_results = ?max_results,
            rows = records.len(),
            "Result materialized"
        );
        Ok(records)
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("transaction_id", &self.inner.transaction_id)
            .field("sql", &self.inner.sql)
            .field("cursor_mode", &self.inner.cursor_mode)
            .finish()
    }
}

/// Rows of the scrollable cursor, executing the statement on first use.
async fn buffered_rows<'s>(
    state: &'s mut QueryState,
    conn: &mut AnyConnection,
    statement: &AnyStatement<'static>,
    params: Vec<Value>,
) -> DbResult<&'s [AnyRow]> {
    if !matches!(state.cursor, Some(Cursor::Scrollable { .. })) {
        let rows = (&mut *conn).fetch_all(build_query(statement, params)).await?;
        state.cursor = Some(Cursor::Scrollable { rows });
    }
    match &state.cursor {
        Some(Cursor::Scrollable { rows }) => Ok(rows),
        _ => Err(DbError::internal("Scrollable cursor was not opened")),
    }
}
