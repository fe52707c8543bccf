//! Database layer.
//!
//! This module provides the driver-facing half of the crate:
//! - Row cursors over sqlx streams and materialized rows
//! - The Postgres/SQLite querier pair
//! - Parameter binding and dynamic column decoding
//! - Driver family dispatch macros

pub mod client;
pub mod cursor;
#[macro_use]
pub mod macros;
pub mod memory;
pub mod params;
pub mod querier;
pub mod types;

pub use client::DbClient;
pub use cursor::{PgRows, RowCursor, SqliteRows, SqlxRows};
pub use macros::DriverFamily;
pub use memory::{MemoryRow, MemoryRows};
pub use querier::{IsolationLevel, PgQuerier, SqliteQuerier, TxOptions};
pub use types::{DynamicMapper, DynamicRow, JsonCell};
