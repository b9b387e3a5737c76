use std::fmt;

use shardns_types::ContainerUuid;

/// Backend status codes carried by every [`StoreError`].
pub mod codes {
    /// Permission denied (e.g. update through a read-only handle).
    pub const NO_PERM: i32 = -1001;
    /// Invalid or already closed handle.
    pub const NO_HDL: i32 = -1002;
    /// Invalid parameters.
    pub const INVAL: i32 = -1003;
    /// Entity already exists.
    pub const EXIST: i32 = -1004;
    /// Entity does not exist.
    pub const NONEXIST: i32 = -1005;
    /// Generic I/O failure.
    pub const IO: i32 = -2001;
}

/// The store operation that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Connect,
    Open,
    Close,
    Fetch,
    Update,
    ListKeys,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Open => write!(f, "open"),
            Self::Close => write!(f, "close"),
            Self::Fetch => write!(f, "fetch"),
            Self::Update => write!(f, "update"),
            Self::ListKeys => write!(f, "list-keys"),
        }
    }
}

/// Errors from record store operations.
///
/// Every variant maps to a backend status code (see [`StoreError::code`]) so
/// callers can report the underlying cause.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The handle is unknown or was already closed.
    #[error("{op}: invalid object handle {handle}")]
    BadHandle { op: StoreOp, handle: u64 },

    /// Write attempted through a read-only handle.
    #[error("{op}: object is open read-only")]
    ReadOnly { op: StoreOp },

    /// Malformed request (size mismatch, short buffer, wrong field shape).
    #[error("{op}: {reason}")]
    Invalid { op: StoreOp, reason: String },

    /// The container does not exist.
    #[error("container {uuid} does not exist")]
    NoContainer { uuid: ContainerUuid },

    /// The container already exists.
    #[error("container {uuid} already exists")]
    ContainerExists { uuid: ContainerUuid },

    /// Raw failure reported by the backend.
    #[error("{op} failed with code {code}")]
    Backend { op: StoreOp, code: i32 },
}

impl StoreError {
    /// The backend status code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::BadHandle { .. } => codes::NO_HDL,
            Self::ReadOnly { .. } => codes::NO_PERM,
            Self::Invalid { .. } => codes::INVAL,
            Self::NoContainer { .. } => codes::NONEXIST,
            Self::ContainerExists { .. } => codes::EXIST,
            Self::Backend { code, .. } => *code,
        }
    }

    pub(crate) fn invalid(op: StoreOp, reason: impl Into<String>) -> Self {
        Self::Invalid {
            op,
            reason: reason.into(),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
