//! Record store client interface for shardns.
//!
//! shardns maps a hierarchical namespace onto a shard-addressed key-value
//! object store. This crate describes the slice of that store the connector
//! relies on: objects addressed by [`ObjectId`](shardns_types::ObjectId),
//! records addressed by a key within an object, and named fields within a
//! record that are either single values or arrays of fixed-size records.
//!
//! # Interfaces
//!
//! - [`RecordPool`] -- connect to (or create) a container by uuid
//! - [`RecordStore`] -- open/close objects, fetch/update fields, list keys
//!
//! # Backends
//!
//! - [`InMemoryRecordStore`] / [`InMemoryPool`] -- `BTreeMap`-based store
//!   with fault injection and per-field fetch counters, for tests and
//!   embedding
//!
//! # Helpers
//!
//! - [`fetch_single`] -- probe-then-fetch read of a value of unknown size

pub mod error;
pub mod memory;
pub mod probe;
pub mod record;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use error::{codes, StoreError, StoreOp, StoreResult};
pub use memory::{InMemoryPool, InMemoryRecordStore, MemoryPoolConfig, StoreStats};
pub use probe::fetch_single;
pub use record::{
    Extent, FieldIo, FieldShape, KeyCursor, ObjectHandle, OpenMode, RECORD_SIZE_ANY,
};
pub use traits::{RecordPool, RecordStore};
