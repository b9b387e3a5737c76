//! Error types for namespace operations.

use shardns_collective::CollectiveError;
use shardns_io::IoError;
use shardns_store::StoreError;
use shardns_types::TypeError;
use thiserror::Error;

/// Errors that can occur during namespace operations.
#[derive(Debug, Error)]
pub enum VolError {
    /// A caller-supplied argument is malformed or names the wrong kind of
    /// object.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// The operation needs write access the container was not opened with.
    #[error("access denied: {0}")]
    Access(String),

    /// The record store reported an error.
    #[error("{context}: store error {code}")]
    Store { code: i32, context: String },

    /// The group could not agree on the result of a collective operation.
    #[error("coordination failure: {0}")]
    Coordination(#[from] CollectiveError),

    /// A link or stored value is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation is valid but not supported for this type or node.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Soft links nested deeper than the configured limit.
    #[error("soft link chain exceeds {depth} hops")]
    LinkDepthExceeded { depth: usize },
}

impl From<StoreError> for VolError {
    fn from(e: StoreError) -> Self {
        VolError::Store {
            code: e.code(),
            context: e.to_string(),
        }
    }
}

impl From<IoError> for VolError {
    fn from(e: IoError) -> Self {
        match e {
            IoError::Store(inner) => inner.into(),
            IoError::Unsupported(msg) => VolError::Unsupported(msg),
            other => VolError::Argument(other.to_string()),
        }
    }
}

impl From<TypeError> for VolError {
    fn from(e: TypeError) -> Self {
        VolError::Argument(e.to_string())
    }
}

/// Attach what the connector was doing to a store failure.
pub(crate) trait StoreContext<T> {
    fn context(self, what: &str) -> VolResult<T>;
}

impl<T> StoreContext<T> for Result<T, StoreError> {
    fn context(self, what: &str) -> VolResult<T> {
        self.map_err(|e| VolError::Store {
            code: e.code(),
            context: format!("{what}: {e}"),
        })
    }
}

/// Convenience alias for namespace results.
pub type VolResult<T> = Result<T, VolError>;
