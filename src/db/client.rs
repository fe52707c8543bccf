//! Family-tagged database client.
//!
//! The library works on whatever pool or transaction the caller already
//! holds. `DbClient` only exists for callers, like the CLI, that pick the
//! family at runtime from a URL.

use crate::context::QueryContext;
use crate::db::DriverFamily;
use crate::error::Result;
use sqlx::{PgPool, SqlitePool};
use tracing::{debug, info};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbClient {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl DbClient {
    /// Connect to the database named by `connection_string`.
    pub async fn connect(ctx: &QueryContext, family: DriverFamily, connection_string: &str) -> Result<Self> {
        debug!(family = %family, "Connecting");
        let client = match family {
            DriverFamily::Postgres => {
                Self::Postgres(ctx.run("connect", PgPool::connect(connection_string)).await?)
            }
            DriverFamily::Sqlite => {
                Self::Sqlite(ctx.run("connect", SqlitePool::connect(connection_string)).await?)
            }
        };
        info!(family = %family, "Connected");
        Ok(client)
    }

    pub fn family(&self) -> DriverFamily {
        match self {
            Self::Postgres(_) => DriverFamily::Postgres,
            Self::Sqlite(_) => DriverFamily::Sqlite,
        }
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        match self {
            Self::Postgres(pool) => pool.close().await,
            Self::Sqlite(pool) => pool.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_sqlite_memory() {
        let ctx = QueryContext::background();
        let client = DbClient::connect(&ctx, DriverFamily::Sqlite, "sqlite::memory:")
            .await
            .unwrap();
        assert_eq!(client.family(), DriverFamily::Sqlite);
        client.close().await;
    }
}
