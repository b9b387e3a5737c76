use shardns_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error("selection sizes differ: file selects {file} elements, memory selects {mem}")]
    SelectionMismatch { file: u64, mem: u64 },

    #[error("buffer too small: need {needed} bytes, have {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    #[error("stored record holds {actual} bytes, expected {expected}")]
    RecordSize { expected: u64, actual: u64 },

    #[error("invalid element: {0}")]
    InvalidElement(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("descriptor codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type IoResult<T> = Result<T, IoError>;
