//! Declarative macros for record declarations.
//!
//! These macros expand at compile time into static field descriptor tables,
//! so no runtime introspection is needed to map rows onto records.

/// Implement [`Record`](crate::db::Record) for a struct with `Default`.
///
/// Each listed field is matched against result column labels ignoring case.
/// A field can be given an explicit label with `field = "label"`. Field types
/// must implement [`FromValue`](crate::models::FromValue).
///
/// # Example
///
/// ```ignore
/// #[derive(Default)]
/// struct Person {
///     id: i64,
///     name: String,
///     born: Option<chrono::NaiveDate>,
/// }
///
/// impl_record!(Person { id, name, born = "birth_date" });
/// ```
#[macro_export]
macro_rules! impl_record {
    (@label $field:ident) => {
        stringify!($field)
    };
    (@label $field:ident, $label:literal) => {
        $label
    };
    ($ty:ty { $($field:ident $(= $label:literal)?),+ $(,)? }) => {
        impl $crate::db::Record for $ty {
            fn fields() -> &'static [$crate::db::Field<Self>] {
                const FIELDS: &[$crate::db::Field<$ty>] = &[
                    $(
                        $crate::db::Field::new(
                            $crate::impl_record!(@label $field $(, $label)?),
                            |record: &mut $ty, value| {
                                record.$field = $crate::models::FromValue::from_value(value)?;
                                Ok(())
                            },
                        ),
                    )+
                ];
                FIELDS
            }
        }
    };
}
