//! Database dispatch macros for reducing code duplication.
//!
//! The engine-specific pool and connection handles live in enums with the
//! same variant names (`MySql`, `Postgres`, `SQLite`); these macros expand the
//! repetitive match over them at compile time.

/// Generate match arms over one of the engine enums in `db::pool`.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(DbPool, pool, {
///     MySql(p) => do_mysql(p),
///     Postgres(p) => do_postgres(p),
///     SQLite(p) => do_sqlite(p),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($ty:ident, $value:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $value {
            $(
                $crate::db::pool::$ty::$variant($p) => $body,
            )+
        }
    };
}
