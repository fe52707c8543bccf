//! Row cursor abstraction.
//!
//! [`RowCursor`] is the minimal surface the unmarshaler needs from a driver's
//! result set. [`SqlxRows`] implements it for any sqlx database by wrapping the
//! `fetch_many` stream, so both driver families share one cursor type while
//! keeping their own concrete row types.
//!
//! # Result sets
//!
//! The stream interleaves rows with a `QueryResult` marker after every
//! statement. A marker ends the current result set: `advance` returns false
//! there, and `next_result_set` moves past it.

use crate::context::QueryContext;
use crate::error::{Error, MappingError, Result};
use crate::models::ColumnType;
use crate::unmarshal::Scan;
use futures_util::TryStreamExt;
use futures_util::stream::BoxStream;
use sqlx::{Column, Database, Either, Row, TypeInfo};
use std::future::Future;
use tracing::{debug, trace};

/// Forward-only, single-pass iterator over query result rows.
///
/// A cursor is not meant to be shared: every operation that moves it takes
/// `&mut self`. The caller closes it exactly once, on every exit path.
pub trait RowCursor: Send {
    type Row;

    /// Move to the next row. Returns false at the end of the current result
    /// set or on error; check [`err`](Self::err) to tell them apart.
    fn advance(&mut self) -> impl Future<Output = bool> + Send;

    /// Decode the current row into `destinations`, one per column.
    fn scan(&self, destinations: &mut [&mut dyn Scan<Self::Row>]) -> Result<()>;

    fn columns(&self) -> Result<Vec<String>>;

    fn column_types(&self) -> Result<Vec<ColumnType>>;

    /// Skip what is left of the current result set and report whether
    /// another one follows.
    fn next_result_set(&mut self) -> impl Future<Output = bool> + Send;

    /// Release the underlying driver resources. Calling it again, or after an
    /// error, is a no-op.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Error that stopped iteration, if any.
    ///
    /// The cursor stays stopped once an error occurs, but the error itself
    /// can be moved out with [`take_err`](Self::take_err). The unmarshaler
    /// does this to return it, so after a failed `unmarshal_*` call this
    /// returns `None` while `advance` keeps returning false.
    fn err(&self) -> Option<&Error>;

    /// Move the error out. The cursor stays stopped.
    fn take_err(&mut self) -> Option<Error>;
}

/// Check a destination list against the column count of the current row.
pub(crate) fn check_destinations(columns: usize, destinations: usize) -> Result<()> {
    if columns != destinations {
        return Err(MappingError::DestinationCount {
            columns,
            destinations,
        }
        .into());
    }
    Ok(())
}

type RowStream<'c, DB> = BoxStream<
    'c,
    std::result::Result<
        Either<<DB as Database>::QueryResult, <DB as Database>::Row>,
        sqlx::Error,
    >,
>;

type StreamItem<DB> = Either<<DB as Database>::QueryResult, <DB as Database>::Row>;

/// Cursor over a sqlx `fetch_many` stream.
///
/// The first item is fetched when the cursor is opened, so query errors
/// surface from the query call and column metadata is available before the
/// first [`advance`](RowCursor::advance).
pub struct SqlxRows<'c, DB: Database> {
    stream: Option<RowStream<'c, DB>>,
    ctx: QueryContext,
    peeked: Option<StreamItem<DB>>,
    current: Option<DB::Row>,
    columns: Option<Vec<ColumnType>>,
    at_boundary: bool,
    exhausted: bool,
    failed: bool,
    closed: bool,
    err: Option<Error>,
    rows_read: u64,
}

/// Postgres family cursor.
pub type PgRows<'c> = SqlxRows<'c, sqlx::Postgres>;

/// SQLite family cursor.
pub type SqliteRows<'c> = SqlxRows<'c, sqlx::Sqlite>;

impl<'c, DB: Database> SqlxRows<'c, DB> {
    pub(crate) async fn open(ctx: &QueryContext, mut stream: RowStream<'c, DB>) -> Result<Self> {
        let first = ctx.run("query", stream.try_next()).await?;

        let mut rows = Self {
            stream: Some(stream),
            ctx: ctx.clone(),
            peeked: None,
            current: None,
            columns: None,
            at_boundary: false,
            exhausted: first.is_none(),
            failed: false,
            closed: false,
            err: None,
            rows_read: 0,
        };
        if let Some(Either::Right(row)) = &first {
            rows.columns = Some(describe(row));
        }
        rows.peeked = first;
        Ok(rows)
    }

    async fn next_item(&mut self) -> Result<Option<StreamItem<DB>>> {
        if let Some(item) = self.peeked.take() {
            return Ok(Some(item));
        }
        if self.exhausted {
            return Ok(None);
        }
        match self.stream.as_mut() {
            Some(stream) => self.ctx.run("row iteration", stream.try_next()).await,
            None => Ok(None),
        }
    }

    fn fail(&mut self, err: Error) {
        debug!(error = %err, rows_read = self.rows_read, "Row cursor stopped on error");
        self.current = None;
        self.failed = true;
        self.err = Some(err);
    }

    fn is_stopped(&self) -> bool {
        self.closed || self.failed
    }
}

fn describe<R: Row>(row: &R) -> Vec<ColumnType> {
    row.columns()
        .iter()
        .map(|col| ColumnType::new(col.name(), col.type_info().name(), col.ordinal()))
        .collect()
}

impl<'c, DB: Database> RowCursor for SqlxRows<'c, DB> {
    type Row = DB::Row;

    async fn advance(&mut self) -> bool {
        if self.is_stopped() || self.at_boundary {
            return false;
        }
        match self.next_item().await {
            Ok(Some(Either::Right(row))) => {
                if self.columns.is_none() {
                    self.columns = Some(describe(&row));
                }
                self.rows_read += 1;
                trace!(rows_read = self.rows_read, "Row fetched");
                self.current = Some(row);
                true
            }
            Ok(Some(Either::Left(_))) => {
                self.current = None;
                self.at_boundary = true;
                false
            }
            Ok(None) => {
                self.current = None;
                self.exhausted = true;
                false
            }
            Err(err) => {
                self.fail(err);
                false
            }
        }
    }

    fn scan(&self, destinations: &mut [&mut dyn Scan<DB::Row>]) -> Result<()> {
        if self.closed {
            return Err(Error::CursorClosed);
        }
        let row = self.current.as_ref().ok_or(Error::NoCurrentRow)?;
        check_destinations(row.len(), destinations.len())?;
        for (index, destination) in destinations.iter_mut().enumerate() {
            destination.scan(row, index)?;
        }
        Ok(())
    }

    fn columns(&self) -> Result<Vec<String>> {
        Ok(self
            .column_types()?
            .into_iter()
            .map(|column| column.name)
            .collect())
    }

    fn column_types(&self) -> Result<Vec<ColumnType>> {
        if self.closed {
            return Err(Error::CursorClosed);
        }
        Ok(self.columns.clone().unwrap_or_default())
    }

    async fn next_result_set(&mut self) -> bool {
        while !self.is_stopped() && !self.at_boundary && !self.exhausted {
            self.advance().await;
        }
        if self.is_stopped() || self.exhausted {
            return false;
        }

        self.at_boundary = false;
        self.columns = None;
        match self.next_item().await {
            Ok(Some(item)) => {
                if let Either::Right(row) = &item {
                    self.columns = Some(describe(row));
                }
                self.peeked = Some(item);
                true
            }
            Ok(None) => {
                self.exhausted = true;
                false
            }
            Err(err) => {
                self.fail(err);
                false
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.current = None;
        self.peeked = None;
        self.stream = None;
        debug!(rows_read = self.rows_read, "Row cursor closed");
        Ok(())
    }

    fn err(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    fn take_err(&mut self) -> Option<Error> {
        self.err.take()
    }
}
