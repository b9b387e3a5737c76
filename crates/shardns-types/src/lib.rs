//! Foundation types for shardns.
//!
//! Every namespace node stored by shardns is addressed by a 128-bit
//! [`ObjectId`] whose low word carries the node's [`NodeKind`] and a
//! per-container index. Containers themselves are addressed by a
//! [`ContainerUuid`] hashed from their name with [`hash128`], so that every
//! process in a group agrees on it without coordination.
//!
//! # Key Types
//!
//! - [`ObjectId`] -- kind-tagged store object identifier
//! - [`NodeKind`] -- group / dataset / named type / map tag
//! - [`IdGenerator`] -- store-provided source of the identifier's high word
//! - [`ContainerUuid`] -- name-derived container identifier

pub mod error;
pub mod hash;
pub mod object;

pub use error::TypeError;
pub use hash::{hash128, ContainerUuid};
pub use object::{IdGenerator, NodeKind, ObjectId, INDEX_BITS, INDEX_MASK, ROOT_INDEX};
