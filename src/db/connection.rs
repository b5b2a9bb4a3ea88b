//! Connection ownership and release bookkeeping.
//!
//! A [`Transaction`](crate::db::Transaction) exclusively owns one
//! [`OwnedConnection`]. The connection sits behind a shared async mutex so the
//! queries created by the transaction can execute on it, and so close can be
//! serialized against commit and rollback.

use crate::error::{DbError, DbResult};
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyConnection, Connection};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::warn;

/// Connection slot shared by a transaction and its queries. `None` once closed.
pub(crate) type SharedConnection = Arc<Mutex<Option<OwnedConnection>>>;

/// A driver connection, either opened directly or borrowed from a pool.
pub enum OwnedConnection {
    Direct(AnyConnection),
    Pooled(PoolConnection<Any>),
}

impl OwnedConnection {
    /// Release the connection: close a direct connection, return a pooled one.
    pub async fn release(self) -> Result<(), sqlx::Error> {
        match self {
            OwnedConnection::Direct(conn) => conn.close().await,
            OwnedConnection::Pooled(conn) => {
                drop(conn);
                Ok(())
            }
        }
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self, OwnedConnection::Pooled(_))
    }
}

impl Deref for OwnedConnection {
    type Target = AnyConnection;

    fn deref(&self) -> &AnyConnection {
        match self {
            OwnedConnection::Direct(conn) => conn,
            OwnedConnection::Pooled(conn) => conn,
        }
    }
}

impl DerefMut for OwnedConnection {
    fn deref_mut(&mut self) -> &mut AnyConnection {
        match self {
            OwnedConnection::Direct(conn) => conn,
            OwnedConnection::Pooled(conn) => conn,
        }
    }
}

impl std::fmt::Debug for OwnedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedConnection")
            .field("backend", &self.backend_name())
            .field("pooled", &self.is_pooled())
            .finish()
    }
}

/// Borrow the live connection out of a locked slot.
pub(crate) fn live_connection<'g>(
    slot: &'g mut Option<OwnedConnection>,
    transaction_id: &str,
) -> DbResult<&'g mut AnyConnection> {
    slot.as_deref_mut()
        .ok_or_else(|| DbError::transaction("Transaction is closed", transaction_id))
}

/// Log and drop an error raised while closing a resource.
pub(crate) fn log_close_error(resource: &str, error: impl std::fmt::Display) {
    let err = DbError::close(resource, error.to_string());
    warn!(error = %err, "Ignoring close failure");
}

/// Counters of connections handed out and released by a factory.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    opened: AtomicU64,
    released: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_open(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    /// Connections handed out to transactions so far.
    pub fn open_count(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    /// Connections released by closed transactions so far.
    pub fn release_count(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    /// Connections currently held by open transactions.
    pub fn active(&self) -> u64 {
        self.open_count().saturating_sub(self.release_count())
    }
}
