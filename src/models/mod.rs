//! Data models shared by the cursor, querier and CLI layers.

pub mod query;

pub use query::{ColumnType, DEFAULT_QUERY_TIMEOUT_SECS, MAX_QUERY_TIMEOUT_SECS, QueryParam};
