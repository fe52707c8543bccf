//! Driver capability pair.
//!
//! [`PgQuerier`] and [`SqliteQuerier`] expose the same three operations but
//! return each family's own cursor, result and transaction types. There is no
//! common supertrait: code picks the trait matching the client it holds, and
//! rows are never wrapped in a shared adapter.
//!
//! Each trait is implemented for the family's pool and for an open
//! transaction. Beginning a transaction on a transaction opens a savepoint.
//!
//! # Architecture
//!
//! The implementations delegate to the `postgres` and `sqlite` submodules
//! below, which are kept structurally parallel so differences stand out.

use crate::context::QueryContext;
use crate::db::cursor::{PgRows, SqliteRows};
use crate::error::{Error, Result};
use crate::models::QueryParam;
use sqlx::postgres::PgQueryResult;
use sqlx::sqlite::SqliteQueryResult;
use sqlx::{PgPool, Postgres, Sqlite, SqlitePool, Transaction};
use std::future::Future;
use tracing::debug;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options for [`PgQuerier::begin_tx`] and [`SqliteQuerier::begin_tx`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    /// `None` keeps the server default
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
}

impl TxOptions {
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// `SET TRANSACTION` statement applying these options, if any apply.
    fn set_transaction_sql(&self) -> Option<String> {
        let mut modes = Vec::new();
        if let Some(level) = self.isolation {
            modes.push(format!("ISOLATION LEVEL {}", level.as_sql()));
        }
        if self.read_only {
            modes.push("READ ONLY".to_string());
        }
        if modes.is_empty() {
            None
        } else {
            Some(format!("SET TRANSACTION {}", modes.join(", ")))
        }
    }
}

/// Query, execute and begin transactions against the Postgres family.
pub trait PgQuerier: Send {
    fn query_context<'a>(
        &'a mut self,
        ctx: &'a QueryContext,
        sql: &'a str,
        args: &'a [QueryParam],
    ) -> impl Future<Output = Result<PgRows<'a>>> + Send + 'a;

    fn exec_context<'a>(
        &'a mut self,
        ctx: &'a QueryContext,
        sql: &'a str,
        args: &'a [QueryParam],
    ) -> impl Future<Output = Result<PgQueryResult>> + Send + 'a;

    fn begin_tx<'a>(
        &'a mut self,
        ctx: &'a QueryContext,
        options: TxOptions,
    ) -> impl Future<Output = Result<Transaction<'a, Postgres>>> + Send + 'a;
}

/// Query, execute and begin transactions against the SQLite family.
pub trait SqliteQuerier: Send {
    fn query_context<'a>(
        &'a mut self,
        ctx: &'a QueryContext,
        sql: &'a str,
        args: &'a [QueryParam],
    ) -> impl Future<Output = Result<SqliteRows<'a>>> + Send + 'a;

    fn exec_context<'a>(
        &'a mut self,
        ctx: &'a QueryContext,
        sql: &'a str,
        args: &'a [QueryParam],
    ) -> impl Future<Output = Result<SqliteQueryResult>> + Send + 'a;

    fn begin_tx<'a>(
        &'a mut self,
        ctx: &'a QueryContext,
        options: TxOptions,
    ) -> impl Future<Output = Result<Transaction<'a, Sqlite>>> + Send + 'a;
}

impl PgQuerier for PgPool {
    async fn query_context<'a>(
        &'a mut self,
        ctx: &'a QueryContext,
        sql: &'a str,
        args: &'a [QueryParam],
    ) -> Result<PgRows<'a>> {
        postgres::query(&*self, ctx, sql, args).await
    }

    async fn exec_context<'a>(
        &'a mut self,
        ctx: &'a QueryContext,
        sql: &'a str,
        args: &'a [QueryParam],
    ) -> Result<PgQueryResult> {
        postgres::execute(&*self, ctx, sql, args).await
    }

    async fn begin_tx<'a>(
        &'a mut self,
        ctx: &'a QueryContext,
        options: TxOptions,
    ) -> Result<Transaction<'a, Postgres>> {
        let tx = ctx.run("begin transaction", self.begin()).await?;
        postgres::apply_options(tx, ctx, options).await
    }
}

impl<'t> PgQuerier for Transaction<'t, Postgres> {
    async fn query_context<'a>(
        &'a mut self,
        ctx: &'a QueryContext,
        sql: &'a str,
        args: &'a [QueryParam],
    ) -> Result<PgRows<'a>> {
        postgres::query(&mut **self, ctx, sql, args).await
    }

    async fn exec_context<'a>(
        &'a mut self,
        ctx: &'a QueryContext,
        sql: &'a str,
        args: &'a [QueryParam],
    ) -> Result<PgQueryResult> {
        postgres::execute(&mut **self, ctx, sql, args).await
    }

    async fn begin_tx<'a>(
        &'a mut self,
        ctx: &'a QueryContext,
        options: TxOptions,
    ) -> Result<Transaction<'a, Postgres>> {
        use sqlx::Connection;
        let tx = ctx.run("begin savepoint", (**self).begin()).await?;
        postgres::apply_options(tx, ctx, options).await
    }
}

impl SqliteQuerier for SqlitePool {
    async fn query_context<'a>(
        &'a mut self,
        ctx: &'a QueryContext,
        sql: &'a str,
        args: &'a [QueryParam],
    ) -> Result<SqliteRows<'a>> {
        sqlite::query(&*self, ctx, sql, args).await
    }

    async fn exec_context<'a>(
        &'a mut self,
        ctx: &'a QueryContext,
        sql: &'a str,
        args: &'a [QueryParam],
    ) -> Result<SqliteQueryResult> {
        sqlite::execute(&*self, ctx, sql, args).await
    }

    async fn begin_tx<'a>(
        &'a mut self,
        ctx: &'a QueryContext,
        options: TxOptions,
    ) -> Result<Transaction<'a, Sqlite>> {
        sqlite::check_options(options)?;
        ctx.run("begin transaction", self.begin()).await
    }
}

impl<'t> SqliteQuerier for Transaction<'t, Sqlite> {
    async fn query_context<'a>(
        &'a mut self,
        ctx: &'a QueryContext,
        sql: &'a str,
        args: &'a [QueryParam],
    ) -> Result<SqliteRows<'a>> {
        sqlite::query(&mut **self, ctx, sql, args).await
    }

    async fn exec_context<'a>(
        &'a mut self,
        ctx: &'a QueryContext,
        sql: &'a str,
        args: &'a [QueryParam],
    ) -> Result<SqliteQueryResult> {
        sqlite::execute(&mut **self, ctx, sql, args).await
    }

    async fn begin_tx<'a>(
        &'a mut self,
        ctx: &'a QueryContext,
        options: TxOptions,
    ) -> Result<Transaction<'a, Sqlite>> {
        use sqlx::Connection;
        sqlite::check_options(options)?;
        ctx.run("begin savepoint", (**self).begin()).await
    }
}

// =============================================================================
// Family-Specific Implementations
// =============================================================================
//
// When `args` is empty the raw SQL is sent without preparing a statement, so
// multi-statement text works and yields one result set per statement.

mod postgres {
    use super::*;
    use crate::db::cursor::SqlxRows;
    use crate::db::params::bind_postgres_param;
    use sqlx::Executor;

    pub async fn query<'e, E>(
        executor: E,
        ctx: &QueryContext,
        sql: &'e str,
        args: &'e [QueryParam],
    ) -> Result<PgRows<'e>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        debug!(sql = %sql, params = args.len(), "Opening Postgres cursor");
        let stream = if args.is_empty() {
            executor.fetch_many(sql)
        } else {
            let mut query = sqlx::query(sql);
            for arg in args {
                query = bind_postgres_param(query, arg);
            }
            executor.fetch_many(query)
        };
        SqlxRows::open(ctx, stream).await
    }

    pub async fn execute<'e, E>(
        executor: E,
        ctx: &QueryContext,
        sql: &'e str,
        args: &'e [QueryParam],
    ) -> Result<PgQueryResult>
    where
        E: Executor<'e, Database = Postgres>,
    {
        debug!(sql = %sql, params = args.len(), "Executing Postgres statement");
        if args.is_empty() {
            ctx.run("execute", executor.execute(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for arg in args {
                query = bind_postgres_param(query, arg);
            }
            ctx.run("execute", executor.execute(query)).await
        }
    }

    pub async fn apply_options<'a>(
        mut tx: Transaction<'a, Postgres>,
        ctx: &QueryContext,
        options: TxOptions,
    ) -> Result<Transaction<'a, Postgres>> {
        if let Some(statement) = options.set_transaction_sql() {
            debug!(statement = %statement, "Applying transaction options");
            ctx.run("set transaction", (&mut *tx).execute(statement.as_str()))
                .await?;
        }
        Ok(tx)
    }
}

mod sqlite {
    use super::*;
    use crate::db::cursor::SqlxRows;
    use crate::db::params::bind_sqlite_param;
    use sqlx::Executor;

    pub async fn query<'e, E>(
        executor: E,
        ctx: &QueryContext,
        sql: &'e str,
        args: &'e [QueryParam],
    ) -> Result<SqliteRows<'e>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        debug!(sql = %sql, params = args.len(), "Opening SQLite cursor");
        let stream = if args.is_empty() {
            executor.fetch_many(sql)
        } else {
            let mut query = sqlx::query(sql);
            for arg in args {
                query = bind_sqlite_param(query, arg);
            }
            executor.fetch_many(query)
        };
        SqlxRows::open(ctx, stream).await
    }

    pub async fn execute<'e, E>(
        executor: E,
        ctx: &QueryContext,
        sql: &'e str,
        args: &'e [QueryParam],
    ) -> Result<SqliteQueryResult>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        debug!(sql = %sql, params = args.len(), "Executing SQLite statement");
        if args.is_empty() {
            ctx.run("execute", executor.execute(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for arg in args {
                query = bind_sqlite_param(query, arg);
            }
            ctx.run("execute", executor.execute(query)).await
        }
    }

    /// SQLite transactions are always serializable and cannot be read-only.
    pub fn check_options(options: TxOptions) -> Result<()> {
        match options.isolation {
            None | Some(IsolationLevel::Serializable) => {}
            Some(level) => {
                return Err(Error::invalid_input(format!(
                    "SQLite does not support isolation level {}",
                    level.as_sql()
                )));
            }
        }
        if options.read_only {
            return Err(Error::invalid_input(
                "SQLite does not support read-only transactions",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_emit_nothing() {
        assert!(TxOptions::default().is_default());
        assert_eq!(TxOptions::default().set_transaction_sql(), None);
    }

    #[test]
    fn test_set_transaction_sql() {
        let options = TxOptions::default()
            .isolation(IsolationLevel::RepeatableRead)
            .read_only();
        assert_eq!(
            options.set_transaction_sql().as_deref(),
            Some("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
        );
    }

    #[test]
    fn test_sqlite_rejects_unsupported_options() {
        assert!(sqlite::check_options(TxOptions::default()).is_ok());
        assert!(
            sqlite::check_options(TxOptions::default().isolation(IsolationLevel::Serializable))
                .is_ok()
        );
        assert!(matches!(
            sqlite::check_options(TxOptions::default().isolation(IsolationLevel::ReadCommitted)),
            Err(Error::InvalidInput { .. })
        ));
        assert!(matches!(
            sqlite::check_options(TxOptions::default().read_only()),
            Err(Error::InvalidInput { .. })
        ));
    }
}
