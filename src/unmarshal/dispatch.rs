//! Capability dispatch.
//!
//! [`Unmarshaler`] drives an open [`RowCursor`] into a `Vec` of records. The
//! target type's capabilities are read once per call:
//!
//! 1. With fast-scan, each record supplies its own destinations and the
//!    mapper is never consulted.
//! 2. Without it, the reflective mapper builds destinations from the column
//!    names, row by row.
//! 3. Once every row is in, post-unmarshal hooks run over the new records in
//!    row order.

use crate::config::UnmarshalOptions;
use crate::context::QueryContext;
use crate::db::RowCursor;
use crate::error::{Error, Result};
use crate::unmarshal::{FastScanFn, PostUnmarshalFn, Record, ReflectiveMapper, TagMapper};
use std::any::type_name;
use tracing::{debug, trace};

/// Populates records from row cursors.
#[derive(Debug, Clone, Default)]
pub struct Unmarshaler<M = TagMapper> {
    mapper: M,
    options: UnmarshalOptions,
}

impl Unmarshaler<TagMapper> {
    /// Tag mapper configured from `options.column_case`.
    pub fn tagged(options: UnmarshalOptions) -> Self {
        Self {
            mapper: TagMapper::new(options.column_case),
            options,
        }
    }
}

impl<M> Unmarshaler<M> {
    pub fn new(mapper: M) -> Self {
        Self {
            mapper,
            options: UnmarshalOptions::default(),
        }
    }

    pub fn with_options(mut self, options: UnmarshalOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &UnmarshalOptions {
        &self.options
    }

    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Append one record per remaining row of the current result set,
    /// creating each with `T::default()`.
    pub async fn unmarshal_all<C, T>(
        &self,
        ctx: &QueryContext,
        rows: &mut C,
        dest: &mut Vec<T>,
    ) -> Result<usize>
    where
        C: RowCursor,
        T: Record<C::Row> + Default,
        M: ReflectiveMapper<T, C::Row>,
    {
        self.unmarshal_with(ctx, rows, dest, T::default).await
    }

    /// Append one record per remaining row of the current result set.
    ///
    /// Returns the number of records appended. The cursor is left open. On
    /// error the records already appended have been scanned but not
    /// post-processed, and should not be used. An iteration error is taken
    /// out of the cursor with [`RowCursor::take_err`] and returned here.
    pub async fn unmarshal_with<C, T, F>(
        &self,
        ctx: &QueryContext,
        rows: &mut C,
        dest: &mut Vec<T>,
        mut factory: F,
    ) -> Result<usize>
    where
        C: RowCursor,
        T: Record<C::Row>,
        M: ReflectiveMapper<T, C::Row>,
        F: FnMut() -> T,
    {
        let plan = Plan::<T, C::Row>::resolve();
        debug!(
            target_type = type_name::<T>(),
            fast_scan = plan.fast_scan.is_some(),
            post_unmarshal = plan.post_unmarshal.is_some(),
            "Unmarshal plan resolved"
        );

        let start = dest.len();
        let mut columns: Option<Vec<String>> = None;

        while rows.advance().await {
            let scanned = dest.len() - start;
            if let Some(limit) = self.options.max_rows {
                if scanned >= limit {
                    return Err(Error::RowLimitExceeded { limit });
                }
            }

            let mut record = factory();
            match plan.fast_scan {
                Some(scan_fast) => {
                    let mut destinations = scan_fast(&mut record);
                    rows.scan(&mut destinations)?;
                }
                None => {
                    if columns.is_none() {
                        columns = Some(rows.columns()?);
                    }
                    let names = columns.as_deref().unwrap_or_default();
                    let mut destinations = self.mapper.map_columns(&mut record, names)?;
                    rows.scan(&mut destinations)?;
                }
            }
            trace!(row_index = scanned, "Row unmarshaled");
            dest.push(record);
        }
        if let Some(err) = rows.take_err() {
            return Err(err);
        }

        let total_rows = dest.len() - start;
        if let Some(hook) = plan.post_unmarshal {
            for (row_index, record) in dest[start..].iter_mut().enumerate() {
                ctx.check("post-unmarshal")?;
                hook(record, ctx, row_index, total_rows)
                    .map_err(|source| Error::post_process(row_index, total_rows, source))?;
            }
        }

        debug!(target_type = type_name::<T>(), total_rows, "Unmarshal complete");
        Ok(total_rows)
    }
}

struct Plan<T, R: ?Sized> {
    fast_scan: Option<FastScanFn<T, R>>,
    post_unmarshal: Option<PostUnmarshalFn<T>>,
}

impl<T: Record<R>, R: ?Sized> Plan<T, R> {
    fn resolve() -> Self {
        Self {
            fast_scan: T::fast_scan_fn(),
            post_unmarshal: T::post_unmarshal_fn(),
        }
    }
}
