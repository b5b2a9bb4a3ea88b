//! Database access layer.
//!
//! This module provides the transactional query machinery:
//! - Connection factories and connection bookkeeping
//! - Transactions owning one connection each
//! - Prepared queries with lazily opened cursors
//! - Row-to-record mapping through memoized binding tables
//! - Schema-less rows and driver type mappings

pub mod connection;
pub mod factory;
#[macro_use]
pub mod macros;
pub mod mapper;
pub mod query;
pub mod row;
pub mod transaction;
pub mod types;

pub use connection::{ConnectionStats, OwnedConnection};
pub use factory::{ConnectionFactory, PoolConnectionFactory, UrlConnectionFactory};
pub use mapper::{BindingTable, Field, Record, Setter, binding_table};
pub use query::{CursorMode, Query};
pub use row::Row;
pub use transaction::Transaction;
