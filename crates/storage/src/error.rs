//! Error types for backend operations

use thiserror::Error;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur while talking to a block backend
#[derive(Error, Debug)]
pub enum StorageError {
    /// The requested object does not exist
    #[error("object not found: {0}")]
    NotFound(String),

    /// Error from the underlying object store
    #[error("object store error: {0}")]
    ObjectStore(#[source] object_store::Error),

    /// The block meta record could not be encoded or decoded
    #[error("invalid block meta: {0}")]
    Meta(#[from] serde_json::Error),

    /// The caller cancelled the read before it completed
    #[error("read cancelled")]
    Cancelled,

    /// A read asked for bytes past the end of the object
    #[error("range {offset}+{length} is out of bounds for an object of {size} bytes")]
    OutOfRange { offset: u64, length: u64, size: u64 },

    /// The backend returned fewer bytes than requested
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// I/O error outside the object store (e.g. creating a local root)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => StorageError::NotFound(path),
            other => StorageError::ObjectStore(other),
        }
    }
}

impl StorageError {
    /// True when the error reports a missing object
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}
