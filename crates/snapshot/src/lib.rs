//! invsync-snapshot: normalized inventory snapshot types.
//!
//! A snapshot is the in-memory capture of one target's remote inventory at
//! fetch time: one collection of raw records per entity kind, each carrying
//! its remote reference and the remote references of related records.
//! Fetchers produce it; the refresh engine consumes it.
//!
//! The JSON form is described by `schema/inventory-snapshot.schema.json` at
//! the workspace root.

pub mod deserialize;
pub mod types;

pub use deserialize::{from_json, from_str, SnapshotError};
pub use types::*;
