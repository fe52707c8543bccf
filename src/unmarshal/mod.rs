//! Record population.
//!
//! - [`capability`]: the scan destination trait and the opt-in record
//!   capabilities
//! - [`mapper`]: the reflective fallback used when a record has no fast-scan
//! - [`dispatch`]: the [`Unmarshaler`] that ties cursors, capabilities and
//!   mappers together

pub mod capability;
pub mod dispatch;
pub mod mapper;

pub use capability::{
    Capabilities, FastScan, FastScanFn, PostUnmarshal, PostUnmarshalFn, Record, Scan,
};
pub use dispatch::Unmarshaler;
pub use mapper::{FastScanOnly, ReflectiveMapper, TagMapper, Tagged};
