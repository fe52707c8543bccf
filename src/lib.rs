//! rowscan library
//!
//! This library populates typed records from SQL result rows on top of sqlx,
//! for the Postgres and SQLite driver families. Record types opt into a fast
//! scan path and a post-processing hook; everything else goes through a
//! replaceable reflective mapper.

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod models;
pub mod select;
pub mod unmarshal;

pub use config::{ColumnCase, Config, UnmarshalOptions};
pub use context::QueryContext;
pub use db::{
    DbClient, DriverFamily, DynamicMapper, DynamicRow, IsolationLevel, MemoryRows, PgQuerier,
    RowCursor, SqliteQuerier, TxOptions,
};
pub use error::{Error, ErrorKind, MappingError, Result};
pub use models::QueryParam;
pub use unmarshal::{
    FastScan, FastScanOnly, PostUnmarshal, Record, ReflectiveMapper, Scan, TagMapper, Tagged,
    Unmarshaler,
};
