//! Query-and-unmarshal helpers.
//!
//! One module per driver family, each with the same two calls:
//! - `select` appends every row of the first result set to `dest`
//! - `get` returns exactly one record
//!
//! Both open the cursor through the family's querier and close it on every
//! exit path.

use crate::config::UnmarshalOptions;
use crate::context::QueryContext;
use crate::db::RowCursor;
use crate::error::{Error, Result};
use crate::unmarshal::{Record, ReflectiveMapper, Unmarshaler};
use tracing::debug;

/// The caller's context, bounded by the configured query timeout when it has
/// no deadline of its own.
fn scoped(ctx: &QueryContext, options: &UnmarshalOptions) -> QueryContext {
    match (ctx.deadline(), options.query_timeout()) {
        (None, Some(timeout)) => ctx.clone().deadline_in(timeout),
        _ => ctx.clone(),
    }
}

async fn drain<C, T, M>(
    ctx: &QueryContext,
    rows: &mut C,
    dest: &mut Vec<T>,
    unmarshaler: &Unmarshaler<M>,
) -> Result<usize>
where
    C: RowCursor,
    T: Record<C::Row> + Default,
    M: ReflectiveMapper<T, C::Row>,
{
    let result = unmarshaler.unmarshal_all(ctx, rows, dest).await;
    let closed = rows.close().await;
    let count = result?;
    closed?;
    Ok(count)
}

fn single<T>(mut records: Vec<T>) -> Result<T> {
    match records.len() {
        1 => records.pop().ok_or(Error::Driver(sqlx::Error::RowNotFound)),
        0 => Err(Error::Driver(sqlx::Error::RowNotFound)),
        count => Err(Error::TooManyRows { count }),
    }
}

/// Postgres family.
pub mod pg {
    use super::*;
    use crate::db::PgQuerier;
    use crate::models::QueryParam;
    use sqlx::postgres::PgRow;

    /// Run `sql` and append one record per returned row to `dest`.
    pub async fn select<Q, T, M>(
        ctx: &QueryContext,
        querier: &mut Q,
        sql: &str,
        args: &[QueryParam],
        dest: &mut Vec<T>,
        unmarshaler: &Unmarshaler<M>,
    ) -> Result<usize>
    where
        Q: PgQuerier,
        T: Record<PgRow> + Default,
        M: ReflectiveMapper<T, PgRow>,
    {
        let ctx = scoped(ctx, unmarshaler.options());
        debug!(family = "postgres", params = args.len(), "Select");
        let mut rows = querier.query_context(&ctx, sql, args).await?;
        drain(&ctx, &mut rows, dest, unmarshaler).await
    }

    /// Run `sql` and return its only row.
    pub async fn get<Q, T, M>(
        ctx: &QueryContext,
        querier: &mut Q,
        sql: &str,
        args: &[QueryParam],
        unmarshaler: &Unmarshaler<M>,
    ) -> Result<T>
    where
        Q: PgQuerier,
        T: Record<PgRow> + Default,
        M: ReflectiveMapper<T, PgRow>,
    {
        let mut records = Vec::with_capacity(1);
        select(ctx, querier, sql, args, &mut records, unmarshaler).await?;
        single(records)
    }
}

/// SQLite family.
pub mod sqlite {
    use super::*;
    use crate::db::SqliteQuerier;
    use crate::models::QueryParam;
    use sqlx::sqlite::SqliteRow;

    /// Run `sql` and append one record per returned row to `dest`.
    pub async fn select<Q, T, M>(
        ctx: &QueryContext,
        querier: &mut Q,
        sql: &str,
        args: &[QueryParam],
        dest: &mut Vec<T>,
        unmarshaler: &Unmarshaler<M>,
    ) -> Result<usize>
    where
        Q: SqliteQuerier,
        T: Record<SqliteRow> + Default,
        M: ReflectiveMapper<T, SqliteRow>,
    {
        let ctx = scoped(ctx, unmarshaler.options());
        debug!(family = "sqlite", params = args.len(), "Select");
        let mut rows = querier.query_context(&ctx, sql, args).await?;
        drain(&ctx, &mut rows, dest, unmarshaler).await
    }

    /// Run `sql` and return its only row.
    pub async fn get<Q, T, M>(
        ctx: &QueryContext,
        querier: &mut Q,
        sql: &str,
        args: &[QueryParam],
        unmarshaler: &Unmarshaler<M>,
    ) -> Result<T>
    where
        Q: SqliteQuerier,
        T: Record<SqliteRow> + Default,
        M: ReflectiveMapper<T, SqliteRow>,
    {
        let mut records = Vec::with_capacity(1);
        select(ctx, querier, sql, args, &mut records, unmarshaler).await?;
        single(records)
    }
}
