//! Materialized, in-memory row cursor.
//!
//! `MemoryRows` replays result sets held as JSON values. Cells decode
//! through serde, so any `DeserializeOwned` type is a valid scan destination.

use crate::context::QueryContext;
use crate::db::cursor::{RowCursor, check_destinations};
use crate::error::{Error, Result};
use crate::models::ColumnType;
use crate::unmarshal::Scan;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::Arc;

/// One materialized row.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRow {
    columns: Arc<[String]>,
    values: Vec<JsonValue>,
}

impl MemoryRow {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[JsonValue] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&JsonValue> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<T: DeserializeOwned> Scan<MemoryRow> for T {
    fn scan(&mut self, row: &MemoryRow, index: usize) -> std::result::Result<(), sqlx::Error> {
        let value = row
            .values
            .get(index)
            .ok_or(sqlx::Error::ColumnIndexOutOfBounds {
                index,
                len: row.values.len(),
            })?;
        *self = serde_json::from_value(value.clone()).map_err(|e| sqlx::Error::ColumnDecode {
            index: index.to_string(),
            source: Box::new(e),
        })?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct ResultSet {
    columns: Arc<[String]>,
    rows: VecDeque<Vec<JsonValue>>,
}

/// Cursor over result sets held in memory.
#[derive(Debug)]
pub struct MemoryRows {
    sets: VecDeque<ResultSet>,
    active: Option<ResultSet>,
    current: Option<MemoryRow>,
    ctx: QueryContext,
    closed: bool,
    failed: bool,
    err: Option<Error>,
}

impl MemoryRows {
    /// A cursor over a single result set.
    pub fn new<I, S>(columns: I, rows: Vec<Vec<JsonValue>>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sets: VecDeque::new(),
            active: Some(ResultSet::new(columns, rows)),
            current: None,
            ctx: QueryContext::background(),
            closed: false,
            failed: false,
            err: None,
        }
    }

    /// Append another result set, reached through `next_result_set`.
    pub fn with_result_set<I, S>(mut self, columns: I, rows: Vec<Vec<JsonValue>>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sets.push_back(ResultSet::new(columns, rows));
        self
    }

    /// Stop iteration once `ctx` is cancelled or past its deadline.
    pub fn with_context(mut self, ctx: QueryContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl ResultSet {
    fn new<I, S>(columns: I, rows: Vec<Vec<JsonValue>>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: rows.into(),
        }
    }
}

impl RowCursor for MemoryRows {
    type Row = MemoryRow;

    async fn advance(&mut self) -> bool {
        if self.closed || self.failed {
            return false;
        }
        if let Err(err) = self.ctx.check("row iteration") {
            self.current = None;
            self.failed = true;
            self.err = Some(err);
            return false;
        }
        let Some(set) = self.active.as_mut() else {
            return false;
        };
        self.current = set.rows.pop_front().map(|values| MemoryRow {
            columns: set.columns.clone(),
            values,
        });
        self.current.is_some()
    }

    fn scan(&self, destinations: &mut [&mut dyn Scan<MemoryRow>]) -> Result<()> {
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
        if self.closed {
            return Err(Error::CursorClosed);
        }
        Ok(self
            .active
            .as_ref()
            .map(|set| set.columns.to_vec())
            .unwrap_or_default())
    }

    fn column_types(&self) -> Result<Vec<ColumnType>> {
        Ok(self
            .columns()?
            .into_iter()
            .enumerate()
            .map(|(ordinal, name)| ColumnType::new(name, "JSON", ordinal))
            .collect())
    }

    async fn next_result_set(&mut self) -> bool {
        if self.closed || self.failed {
            return false;
        }
        self.current = None;
        self.active = self.sets.pop_front();
        self.active.is_some()
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.current = None;
        self.active = None;
        self.sets.clear();
        Ok(())
    }

    fn err(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    fn take_err(&mut self) -> Option<Error> {
        self.err.take()
    }
}
