use tracing::{debug, error, warn};

use crate::comm::{Communicator, LEADER_RANK};
use crate::envelope::{Envelope, STATIC_BUF_SIZE};
use crate::error::CollectiveError;

/// Result of a metadata exchange on one process.
#[derive(Debug)]
pub struct Exchanged<L> {
    /// The envelope every member of the group now holds.
    pub envelope: Envelope,
    /// What the leader closure produced besides the envelope. `Some` only on
    /// the process that ran it.
    pub local: Option<L>,
}

/// Promise to broadcast once. Dropping it armed sends a zeroed prefix so
/// followers fail instead of waiting forever.
struct MustBroadcast<'a> {
    comm: &'a dyn Communicator,
    armed: bool,
}

impl<'a> MustBroadcast<'a> {
    fn arm(comm: &'a dyn Communicator) -> Self {
        Self { comm, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for MustBroadcast<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(rank = self.comm.rank(), "leader failed, broadcasting empty metadata");
        let mut zeroed = [0u8; STATIC_BUF_SIZE];
        if let Err(e) = self.comm.broadcast(&mut zeroed, LEADER_RANK) {
            error!(rank = self.comm.rank(), error = %e, "failed to broadcast leader failure");
        }
    }
}

/// Run one collective metadata operation.
///
/// When `collective` is set and the group has more than one member, only the
/// leader runs `leader`; it then broadcasts the envelope (a fixed
/// [`STATIC_BUF_SIZE`] prefix, plus a second broadcast with the remainder if
/// the envelope is larger). Followers receive and decode it without doing any
/// store work. If the leader fails before its first broadcast, followers get
/// [`CollectiveError::LeaderFailed`]. Failures after the broadcast has begun
/// are local to the process that sees them.
///
/// When `collective` is not set every process runs `leader` itself.
pub fn exchange<L, E, F>(
    comm: &dyn Communicator,
    collective: bool,
    nsegments: usize,
    leader: F,
) -> Result<Exchanged<L>, E>
where
    F: FnOnce() -> Result<(Envelope, L), E>,
    E: From<CollectiveError>,
{
    if !collective || comm.size() == 1 {
        let (envelope, local) = leader()?;
        check_segments(&envelope, nsegments)?;
        return Ok(Exchanged {
            envelope,
            local: Some(local),
        });
    }

    if comm.is_leader() {
        lead(comm, nsegments, leader)
    } else {
        let envelope = follow(comm, nsegments)?;
        Ok(Exchanged {
            envelope,
            local: None,
        })
    }
}

fn check_segments(envelope: &Envelope, nsegments: usize) -> Result<(), CollectiveError> {
    if envelope.segments.len() != nsegments {
        return Err(CollectiveError::Malformed(format!(
            "expected {nsegments} segments, leader produced {}",
            envelope.segments.len()
        )));
    }
    Ok(())
}

fn lead<L, E, F>(comm: &dyn Communicator, nsegments: usize, leader: F) -> Result<Exchanged<L>, E>
where
    F: FnOnce() -> Result<(Envelope, L), E>,
    E: From<CollectiveError>,
{
    let mut promise = MustBroadcast::arm(comm);
    let (envelope, local) = leader()?;
    check_segments(&envelope, nsegments)?;
    let mut encoded = envelope.encode()?;
    promise.disarm();

    debug!(
        rank = comm.rank(),
        oid = %envelope.id,
        len = encoded.len(),
        "broadcasting metadata"
    );
    let mut prefix = [0u8; STATIC_BUF_SIZE];
    let head = encoded.len().min(STATIC_BUF_SIZE);
    prefix[..head].copy_from_slice(&encoded[..head]);
    comm.broadcast(&mut prefix, LEADER_RANK)?;
    if encoded.len() > STATIC_BUF_SIZE {
        comm.broadcast(&mut encoded[STATIC_BUF_SIZE..], LEADER_RANK)?;
    }
    Ok(Exchanged {
        envelope,
        local: Some(local),
    })
}

fn follow(comm: &dyn Communicator, nsegments: usize) -> Result<Envelope, CollectiveError> {
    let mut prefix = [0u8; STATIC_BUF_SIZE];
    comm.broadcast(&mut prefix, LEADER_RANK)?;
    let (_, lens) = Envelope::decode_header(&prefix, nsegments).map_err(|e| {
        warn!(rank = comm.rank(), error = %e, "no metadata from leader");
        e
    })?;
    let total = Envelope::total_len(&lens)?;
    let envelope = if total <= STATIC_BUF_SIZE {
        Envelope::decode(&prefix[..total], nsegments)?
    } else {
        let mut buf = vec![0u8; total];
        buf[..STATIC_BUF_SIZE].copy_from_slice(&prefix);
        comm.broadcast(&mut buf[STATIC_BUF_SIZE..], LEADER_RANK)?;
        Envelope::decode(&buf, nsegments)?
    };
    debug!(rank = comm.rank(), oid = %envelope.id, len = total, "received metadata");
    Ok(envelope)
}
