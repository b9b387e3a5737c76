//! Group coordination and collective metadata exchange for shardns.
//!
//! A fixed group of processes opens a container together. For every
//! namespace operation that creates or opens a node, one leader performs the
//! store work and broadcasts the resulting metadata; the followers rebuild
//! the node from the broadcast without touching the store. If the leader
//! fails before it broadcasts, it still sends a zeroed prefix so the
//! followers fail too instead of blocking.
//!
//! # Key Types
//!
//! - [`Communicator`] -- rank, size and blocking broadcast
//! - [`LocalGroup`] / [`LocalComm`] -- in-process group backed by threads
//! - [`Envelope`] -- `[ObjectId][segment lengths][segments]` wire form
//! - [`exchange`] -- leader/follower driver with the must-broadcast guarantee

pub mod comm;
pub mod envelope;
pub mod error;
pub mod exchange;
pub mod local;

pub use comm::{Communicator, SelfComm, LEADER_RANK};
pub use envelope::{Envelope, STATIC_BUF_SIZE};
pub use error::{CollectiveError, CollectiveResult};
pub use exchange::{exchange, Exchanged};
pub use local::{LocalComm, LocalGroup};
