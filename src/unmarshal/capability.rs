//! Capabilities a record type can opt into.
//!
//! A record declares its capabilities through [`Record`], whose associated
//! functions take no instance. The dispatcher asks once per target type and
//! reuses the answer for every row.

use crate::context::QueryContext;
use crate::error::BoxDynError;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Decode, Postgres, Row, Sqlite, Type};

/// A scan destination: one addressable slot filled from one column of `R`.
pub trait Scan<R: ?Sized> {
    fn scan(&mut self, row: &R, index: usize) -> Result<(), sqlx::Error>;
}

impl<T> Scan<PgRow> for T
where
    T: for<'r> Decode<'r, Postgres> + Type<Postgres>,
{
    fn scan(&mut self, row: &PgRow, index: usize) -> Result<(), sqlx::Error> {
        *self = row.try_get::<T, _>(index)?;
        Ok(())
    }
}

impl<T> Scan<SqliteRow> for T
where
    T: for<'r> Decode<'r, Sqlite> + Type<Sqlite>,
{
    fn scan(&mut self, row: &SqliteRow, index: usize) -> Result<(), sqlx::Error> {
        *self = row.try_get::<T, _>(index)?;
        Ok(())
    }
}

/// Fast path: the record hands out its own scan destinations, in column order.
///
/// The number of destinations must equal the column count of every query the
/// type is used with. Only the count is checked, never the names.
pub trait FastScan<R: ?Sized> {
    fn scan_fast(&mut self) -> Vec<&mut dyn Scan<R>>;
}

/// Hook run over every record after the whole result set is materialized.
pub trait PostUnmarshal {
    /// `row_index` runs from 0 to `total_rows - 1` in row order.
    fn post_unmarshal(
        &mut self,
        ctx: &QueryContext,
        row_index: usize,
        total_rows: usize,
    ) -> Result<(), BoxDynError>;
}

pub type FastScanFn<T, R> = for<'a> fn(&'a mut T) -> Vec<&'a mut dyn Scan<R>>;

pub type PostUnmarshalFn<T> = fn(&mut T, &QueryContext, usize, usize) -> Result<(), BoxDynError>;

/// A type that can be populated from rows of `R`.
///
/// Both capabilities default to absent, which sends every row through the
/// reflective mapper and skips post-processing. Use [`impl_record!`] to
/// declare them.
///
/// [`impl_record!`]: crate::impl_record
pub trait Record<R: ?Sized>: Sized {
    fn fast_scan_fn() -> Option<FastScanFn<Self, R>> {
        None
    }

    fn post_unmarshal_fn() -> Option<PostUnmarshalFn<Self>> {
        None
    }
}

/// Which capabilities a target type declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub fast_scan: bool,
    pub post_unmarshal: bool,
}

impl Capabilities {
    pub fn of<T: Record<R>, R: ?Sized>() -> Self {
        Self {
            fast_scan: T::fast_scan_fn().is_some(),
            post_unmarshal: T::post_unmarshal_fn().is_some(),
        }
    }
}

/// Implement [`Record`] for a target type and row type.
///
/// ```ignore
/// impl_record!(User => SqliteRow);                              // reflective only
/// impl_record!(User => SqliteRow { fast_scan });                 // FastScan<SqliteRow>
/// impl_record!(User => SqliteRow { fast_scan, post_unmarshal }); // both
/// ```
#[macro_export]
macro_rules! impl_record {
    (@cap fast_scan, $row:ty) => {
        fn fast_scan_fn() -> Option<$crate::unmarshal::FastScanFn<Self, $row>> {
            Some(<Self as $crate::unmarshal::FastScan<$row>>::scan_fast)
        }
    };
    (@cap post_unmarshal, $row:ty) => {
        fn post_unmarshal_fn() -> Option<$crate::unmarshal::PostUnmarshalFn<Self>> {
            Some(<Self as $crate::unmarshal::PostUnmarshal>::post_unmarshal)
        }
    };
    ($target:ty => $row:ty) => {
        impl $crate::unmarshal::Record<$row> for $target {}
    };
    ($target:ty => $row:ty { $($cap:ident),+ $(,)? }) => {
        impl $crate::unmarshal::Record<$row> for $target {
            $( $crate::impl_record!(@cap $cap, $row); )+
        }
    };
}
