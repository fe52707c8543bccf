//! Driver family dispatch.
//!
//! This module provides a declarative macro that expands a per-family match
//! over [`DbClient`](crate::db::DbClient) at compile time. Each arm sees the
//! family's concrete pool, so code inside it is written against that family's
//! querier trait.

/// Database driver family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverFamily {
    Postgres,
    Sqlite,
}

impl DriverFamily {
    /// Detect the family from a connection URL scheme.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::Postgres)
        } else if lower.starts_with("sqlite:") {
            Some(Self::Sqlite)
        } else {
            None
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::Sqlite => "SQLite",
        }
    }
}

impl std::fmt::Display for DriverFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Macro for generating driver family dispatch match arms.
///
/// # Example
///
/// ```ignore
/// impl_family_dispatch!(client, {
///     Postgres(pool) => select::pg::select(&ctx, pool, sql, &args, &mut out, &u).await,
///     Sqlite(pool) => select::sqlite::select(&ctx, pool, sql, &args, &mut out, &u).await,
/// });
/// ```
#[macro_export]
macro_rules! impl_family_dispatch {
    ($client:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $client {
            $(
                $crate::db::DbClient::$variant($p) => $body,
            )+
        }
    };
}

pub use impl_family_dispatch;
