use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectiveError {
    /// The leader failed before broadcasting and sent a zeroed prefix.
    #[error("leader failed before broadcasting metadata")]
    LeaderFailed,

    #[error("broadcast size mismatch on rank {rank}: root sent {sent} bytes, receiver expects {expected}")]
    SizeMismatch {
        rank: usize,
        sent: usize,
        expected: usize,
    },

    #[error("rank {rank} timed out waiting for broadcast from rank {root}")]
    Timeout { rank: usize, root: usize },

    #[error("invalid root rank {root} for a group of {size}")]
    InvalidRoot { root: usize, size: usize },

    #[error("broadcast root mismatch on rank {rank}: expected {expected}, posted by {actual}")]
    RootMismatch {
        rank: usize,
        expected: usize,
        actual: usize,
    },

    #[error("first envelope segment is empty")]
    EmptyFirstSegment,

    #[error("malformed envelope: {0}")]
    Malformed(String),
}

pub type CollectiveResult<T> = Result<T, CollectiveError>;
