use crate::error::{CollectiveError, CollectiveResult};

/// Rank that performs store work in a collective operation.
pub const LEADER_RANK: usize = 0;

/// A fixed group of cooperating processes.
///
/// `broadcast` is blocking and lock-step: every member calls it in the same
/// order with the same root and a buffer of the same length. On the root the
/// buffer is the source; on every other member it is overwritten.
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn broadcast(&self, buf: &mut [u8], root: usize) -> CollectiveResult<()>;

    fn is_leader(&self) -> bool {
        self.rank() == LEADER_RANK
    }
}

/// Single-member group. Broadcasts are no-ops.
#[derive(Clone, Copy, Debug, Default)]
pub struct SelfComm;

impl Communicator for SelfComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast(&self, _buf: &mut [u8], root: usize) -> CollectiveResult<()> {
        if root != 0 {
            return Err(CollectiveError::InvalidRoot { root, size: 1 });
        }
        Ok(())
    }
}
