//! Selection and datatype translation for shardns.
//!
//! Applications address typed, multi-dimensional data through selections on
//! a dataspace; the store only knows records and extents. This crate
//! bridges the two:
//!
//! - [`Selection`] / [`Dataspace`] -- row-major runs over a shape
//! - [`to_extents`] -- runs to store extents, in bytes or elements
//! - [`Datatype`] -- element type descriptors with a `bincode` codec
//! - [`needs_background`] / [`convert`] -- in-place element conversion
//! - [`read_fixed`] / [`write_fixed`] -- fixed-size element transfer
//! - [`read_vlen`] / [`write_vlen`] -- one record per variable-length element

pub mod convert;
pub mod datatype;
pub mod error;
pub mod extent;
pub mod selection;
pub mod transfer;
pub mod vlen;

pub use convert::{convert, convert_to_vec, needs_background};
pub use datatype::{ByteOrder, Datatype, Member};
pub use error::{IoError, IoResult};
pub use extent::{byte_ranges, to_extents, ExtentUnits, DEFAULT_SELECTION_BATCH};
pub use selection::{Dataspace, HyperslabDim, Selection};
pub use transfer::{
    read_fixed, read_whole, write_fixed, write_whole, ElementLayout, RecordTarget,
    TransferOptions,
};
pub use vlen::{element_key, read_vlen, write_vlen, VlKind};
