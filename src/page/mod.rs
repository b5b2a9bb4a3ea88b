//! Windowed pagination.
//!
//! [`PageDataModel`] presents an index-addressable view over a result set of
//! unknown size while caching only one page of records. Each page refresh
//! runs on a fresh transaction and query, built by a [`QueryBuilder`].

pub mod builder;
pub mod data_model;

pub use builder::{QueryBuilder, SqlQueryBuilder};
pub use data_model::{PageDataModel, PageIter};
