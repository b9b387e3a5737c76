//! Hierarchical namespace connector for shardns.
//!
//! This crate maps a namespace of groups, datasets, named types, maps and
//! attributes onto a sharded record store. Every node is one store object
//! whose id encodes its kind; groups hold named links to other nodes.
//!
//! # Architecture
//!
//! - **Containers** are opened collectively by a group of processes. The
//!   leader bootstraps the store connection and broadcasts the root group and
//!   the object index counter.
//! - **Creates** are always collective: the leader allocates an index, stores
//!   the counter, writes the node's metadata and the link to it, then
//!   broadcasts the new id and metadata. Followers never touch the store.
//! - **Opens** are collective when `collective_metadata` is set, otherwise
//!   every process resolves the path and reads the metadata itself.
//! - **Paths** are resolved one link per hop; soft links are resolved again
//!   on each use, up to a configurable depth.
//! - **Element I/O** goes straight to the store on every process that asks
//!   for it.
//!
//! # Modules
//!
//! - [`container`] -- [`Container`] bootstrap and index allocation
//! - [`node`] -- [`Node`], the shared live-handle count behind every node
//! - [`group`], [`dataset`], [`named_type`], [`map`], [`attribute`] -- typed
//!   nodes
//! - [`object`] -- [`Object`], a node whose kind is known only at run time
//! - [`link`] -- [`LinkRecord`] wire form
//! - [`keys`] -- record keys and field names of the on-store layout
//! - [`config`] -- [`ConnectorConfig`], loaded from TOML

pub mod attribute;
pub mod config;
pub mod container;
pub mod dataset;
pub mod error;
pub mod group;
pub mod keys;
pub mod link;
pub mod map;
pub mod named_type;
pub mod node;
pub mod object;
pub mod props;

mod path;
#[cfg(test)]
mod testing;

pub use attribute::{Attribute, HasAttributes};
pub use config::ConnectorConfig;
pub use container::Container;
pub use dataset::Dataset;
pub use error::{VolError, VolResult};
pub use group::Group;
pub use link::LinkRecord;
pub use map::Map;
pub use named_type::NamedType;
pub use node::Node;
pub use object::Object;
pub use props::PropertyList;
