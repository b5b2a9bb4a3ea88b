//! Transactions.
//!
//! A [`Transaction`] exclusively owns one connection and every [`Query`] it
//! prepares. Closing the transaction closes its queries first, rolls back
//! uncommitted work in manual-commit mode and then releases the connection.
//!
//! # Locking
//!
//! Two async mutexes are involved. The query set lock serializes the
//! transaction's own operations; the connection lock is shared with the
//! queries so that only one statement runs on the connection at a time. Both
//! are always taken in that order.

use crate::db::connection::{
    ConnectionStats, OwnedConnection, SharedConnection, live_connection, log_close_error,
};
use crate::db::query::{CursorMode, Query};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, IsolationLevel};
use chrono::{DateTime, Utc};
use sqlx::{AnyConnection, Executor, Statement};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A unit of work on one exclusively owned connection.
pub struct Transaction {
    id: String,
    opened_at: DateTime<Utc>,
    db_type: DatabaseType,
    auto_commit: bool,
    isolation: IsolationLevel,
    connection: SharedConnection,
    queries: Mutex<Vec<Query>>,
    stats: Option<Arc<ConnectionStats>>,
}

impl Transaction {
    /// Take ownership of `conn` and begin a transaction on it.
    ///
    /// With `auto_commit` every statement commits on its own and the isolation
    /// level is applied to the session. Otherwise a database transaction is
    /// opened at `isolation` right away. The connection is released if that
    /// fails.
    pub async fn begin(
        conn: OwnedConnection,
        auto_commit: bool,
        isolation: IsolationLevel,
    ) -> DbResult<Self> {
        Self::begin_tracked(conn, auto_commit, isolation, None).await
    }

    pub(crate) async fn begin_tracked(
        mut conn: OwnedConnection,
        auto_commit: bool,
        isolation: IsolationLevel,
        stats: Option<Arc<ConnectionStats>>,
    ) -> DbResult<Self> {
        let id = generate_transaction_id();

        let backend = DatabaseType::from_backend_name(conn.backend_name());
        let started = match backend {
            Some(db_type) => {
                let statements = if auto_commit {
                    isolation.session_statements(db_type)
                } else {
                    isolation.begin_statements(db_type)
                };
                execute_all(&mut conn, &statements).await.map(|_| db_type)
            }
            None => Err(DbError::connection(
                format!("Unsupported database backend: {}", conn.backend_name()),
                "Use a PostgreSQL, MySQL or SQLite connection",
            )),
        };

        let db_type = match started {
            Ok(db_type) => db_type,
            Err(e) => {
                release_connection(&id, conn, true, stats.as_deref()).await;
                return Err(e);
            }
        };

        info!(
            transaction_id = %id,
            db_type = %db_type,
            auto_commit,
            isolation = %isolation,
            "Transaction started"
        );

        Ok(Self {
            id,
            opened_at: Utc::now(),
            db_type,
            auto_commit,
            isolation,
            connection: Arc::new(Mutex::new(Some(conn))),
            queries: Mutex::new(Vec::new()),
            stats,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    pub fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub async fn is_closed(&self) -> bool {
        self.connection.lock().await.is_none()
    }

    /// Number of queries prepared and not yet closed.
    pub async fn query_count(&self) -> usize {
        self.queries.lock().await.len()
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// Prepare `sql` with a forward-only cursor.
    pub async fn prepare(&self, sql: &str) -> DbResult<Query> {
        self.prepare_with(sql, CursorMode::ForwardOnly).await
    }

    /// Prepare `sql` and track the resulting query until the transaction
    /// closes.
    pub async fn prepare_with(&self, sql: &str, cursor_mode: CursorMode) -> DbResult<Query> {
        let mut queries = self.queries.lock().await;
        let statement = {
            let mut slot = self.connection.lock().await;
            let conn = live_connection(&mut slot, &self.id)?;
            let statement = (&mut *conn).prepare(sql).await?;
            Statement::to_owned(&statement)
        };

        let query = Query::new(
            &self.id,
            sql,
            statement,
            cursor_mode,
            Arc::clone(&self.connection),
        );
        queries.push(query.clone());

        debug!(
            transaction_id = %self.id,
            sql = %sql,
            cursor_mode = ?cursor_mode,
            "Statement prepared"
        );
        Ok(query)
    }

    /// Prepare and execute `sql` as a mutation, returning the rows affected.
    pub async fn update(&self, sql: &str) -> DbResult<u64> {
        let query = self.prepare(sql).await?;
        let result = query.update().await;
        self.close_query(&query).await;
        result
    }

    /// Close one query early and stop tracking it.
    pub async fn close_query(&self, query: &Query) {
        let mut queries = self.queries.lock().await;
        queries.retain(|q| !q.same_as(query));
        query.close().await;
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Commit pending work. In manual-commit mode a new database transaction
    /// is begun right away.
    pub async fn commit(&self) -> DbResult<()> {
        self.finish("COMMIT").await?;
        info!(transaction_id = %self.id, "Transaction committed");
        Ok(())
    }

    /// Discard pending work. In manual-commit mode a new database transaction
    /// is begun right away.
    pub async fn rollback(&self) -> DbResult<()> {
        self.finish("ROLLBACK").await?;
        info!(transaction_id = %self.id, "Transaction rolled back");
        Ok(())
    }

    /// Close every owned query, roll back uncommitted work and release the
    /// connection. Failures are logged, never returned. Safe to call again.
    pub async fn close(&self) {
        let mut queries = self.queries.lock().await;
        for query in queries.drain(..) {
            query.close().await;
        }

        let Some(conn) = self.connection.lock().await.take() else {
            return;
        };
        release_connection(&self.id, conn, self.auto_commit, self.stats.as_deref()).await;
        info!(transaction_id = %self.id, "Transaction closed");
    }

    async fn finish(&self, statement: &str) -> DbResult<()> {
        let _queries = self.queries.lock().await;
        let mut slot = self.connection.lock().await;
        let conn = live_connection(&mut slot, &self.id)?;

        if self.auto_commit {
            return Err(DbError::transaction(
                format!("{} is not allowed in auto-commit mode", statement),
                &self.id,
            ));
        }

        (&mut *conn).execute(sqlx::raw_sql(statement)).await?;
        execute_all(conn, &self.isolation.begin_statements(self.db_type)).await
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("db_type", &self.db_type)
            .field("auto_commit", &self.auto_commit)
            .field("isolation", &self.isolation)
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let conn = match self.connection.try_lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(conn) = conn else {
            return;
        };

        warn!(
            transaction_id = %self.id,
            "Transaction dropped without close - consider calling close()"
        );

        // Rollback and release need the runtime; without one the connection is just dropped
        let id = self.id.clone();
        let auto_commit = self.auto_commit;
        let stats = self.stats.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    release_connection(&id, conn, auto_commit, stats.as_deref()).await;
                });
            }
            Err(_) => {
                drop(conn);
                if let Some(stats) = stats {
                    stats.record_release();
                }
            }
        }
    }
}

async fn execute_all(conn: &mut AnyConnection, statements: &[String]) -> DbResult<()> {
    for sql in statements {
        (&mut *conn).execute(sqlx::raw_sql(sql)).await?;
    }
    Ok(())
}

/// Roll back (manual-commit only) and release a connection, logging failures.
async fn release_connection(
    transaction_id: &str,
    mut conn: OwnedConnection,
    auto_commit: bool,
    stats: Option<&ConnectionStats>,
) {
    if !auto_commit {
        if let Err(e) = (&mut *conn).execute(sqlx::raw_sql("ROLLBACK")).await {
            log_close_error("transaction", e);
        }
    }
    if let Err(e) = conn.release().await {
        log_close_error("connection", e);
    }
    if let Some(stats) = stats {
        stats.record_release();
    }
    debug!(transaction_id = %transaction_id, "Connection released");
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_transaction_id() {
        let id1 = generate_transaction_id();
        let id2 = generate_transaction_id();

        assert!(id1.starts_with("tx_"));
        assert!(id2.starts_with("tx_"));
        assert_ne!(id1, id2);
    }
}
