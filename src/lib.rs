//! db-pager library
//!
//! A transactional data-access layer over SQL databases (SQLite, PostgreSQL,
//! MySQL): prepared queries with typed row mapping, and a windowed page cache
//! for consumers that read one row index at a time.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod page;

pub use config::Config;
pub use db::{ConnectionFactory, CursorMode, Query, Record, Row, Transaction};
pub use error::{DbError, DbResult};
pub use models::{IsolationLevel, Value};
pub use page::{PageDataModel, QueryBuilder, SqlQueryBuilder};
