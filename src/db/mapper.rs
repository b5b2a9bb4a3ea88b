//! Row-to-record mapping.
//!
//! A [`Record`] type declares its writable fields once as a static slice of
//! [`Field`] descriptors (usually through [`impl_record!`](crate::impl_record)).
//! When a result is materialized, a [`BindingTable`] pairs each result column
//! with the first field whose name matches the column label ignoring case.
//! Binding tables are memoized per (record type, column labels) so the
//! matching work happens once per schema.
//!
//! Labels are compared with full Unicode lowercase folding, so `NAMÉ` binds to
//! a field named `namé`.
//!
//! The memo table lives for the whole process and is never evicted. It grows
//! by one entry per distinct column-label list seen for a record type, which
//! stays small for programs that issue a fixed set of statements. Programs
//! that generate arbitrary column aliases at runtime grow it without bound.

use crate::db::types::decode_column;
use crate::error::{DbError, DbResult};
use crate::models::Value;
use sqlx::any::AnyRow;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use tracing::trace;

/// Setter for one record field. Returns the value back on type mismatch.
pub type Setter<T> = fn(&mut T, Value) -> Result<(), Value>;

/// Descriptor of one writable record field.
pub struct Field<T> {
    name: &'static str,
    set: Setter<T>,
}

impl<T> Field<T> {
    pub const fn new(name: &'static str, set: Setter<T>) -> Self {
        Self { name, set }
    }

    /// Label matched against result column names.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn assign(&self, record: &mut T, value: Value) -> Result<(), Value> {
        (self.set)(record, value)
    }
}

impl<T> std::fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field").field("name", &self.name).finish()
    }
}

/// A type that result rows can be mapped into.
///
/// Records start from `Default::default()`; fields without a matching column
/// keep their default value.
pub trait Record: Default + Send + Sync + 'static {
    /// Writable fields in declaration order.
    fn fields() -> &'static [Field<Self>];
}

struct Binding<T: 'static> {
    column_index: usize,
    field: &'static Field<T>,
}

/// Precomputed column-to-field assignments for one record type and schema.
pub struct BindingTable<T: 'static> {
    bindings: Vec<Binding<T>>,
}

impl<T: Record> BindingTable<T> {
    /// Match column labels against the fields of `T`.
    ///
    /// Columns with no matching field are skipped. When several fields match
    /// the same column, the first one in declaration order wins.
    pub fn build(columns: &[String]) -> Self {
        let fields = T::fields();
        let mut bindings = Vec::new();

        for (column_index, label) in columns.iter().enumerate() {
            if let Some(field) = fields.iter().find(|f| labels_match(f.name, label)) {
                trace!(
                    record = std::any::type_name::<T>(),
                    column = %label,
                    property = field.name,
                    "Bound column to property"
                );
                bindings.push(Binding {
                    column_index,
                    field,
                });
            }
        }

        Self { bindings }
    }

    /// Number of bound columns.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// (column index, property name) pairs in column order.
    pub fn bindings(&self) -> impl Iterator<Item = (usize, &'static str)> + '_ {
        self.bindings.iter().map(|b| (b.column_index, b.field.name))
    }

    /// Map one driver row, decoding only the bound columns.
    pub fn map_row(&self, row: &AnyRow) -> DbResult<T> {
        let mut record = T::default();
        for binding in &self.bindings {
            let value = decode_column(row, binding.column_index)?;
            Self::apply(&mut record, binding, value)?;
        }
        Ok(record)
    }

    /// Map already-decoded column values.
    pub fn map_values(&self, values: &[Value]) -> DbResult<T> {
        let mut record = T::default();
        for binding in &self.bindings {
            let value = values.get(binding.column_index).cloned().unwrap_or_default();
            Self::apply(&mut record, binding, value)?;
        }
        Ok(record)
    }

    fn apply(record: &mut T, binding: &Binding<T>, value: Value) -> DbResult<()> {
        // Null leaves the default in place
        if value.is_null() {
            return Ok(());
        }
        binding
            .field
            .assign(record, value)
            .map_err(|v| DbError::mapping(binding.column_index, binding.field.name, v.type_name()))
    }
}

/// Case-insensitive label comparison, folding each character to lowercase.
fn labels_match(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

type CacheKey = (TypeId, Vec<String>);

static BINDING_CACHE: LazyLock<RwLock<HashMap<CacheKey, Arc<dyn Any + Send + Sync>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Get the memoized binding table of `T` for the given column labels.
pub fn binding_table<T: Record>(columns: &[String]) -> Arc<BindingTable<T>> {
    let key: CacheKey = (TypeId::of::<T>(), columns.to_vec());

    {
        let cache = BINDING_CACHE.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(table) = cache.get(&key) {
            if let Ok(table) = Arc::clone(table).downcast::<BindingTable<T>>() {
                return table;
            }
        }
    } // Read lock released here

    let table = Arc::new(BindingTable::<T>::build(columns));
    let mut cache = BINDING_CACHE.write().unwrap_or_else(PoisonError::into_inner);
    let entry = cache
        .entry(key)
        .or_insert_with(|| Arc::clone(&table) as Arc<dyn Any + Send + Sync>);
    Arc::clone(entry)
        .downcast::<BindingTable<T>>()
        .unwrap_or(table)
}
