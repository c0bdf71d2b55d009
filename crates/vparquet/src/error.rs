//! Error types for vParquet block operations

use crate::encoding::delta::CodecError;
use parquet::errors::ParquetError;
use storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

/// Result type for vParquet operations
pub type Result<T> = std::result::Result<T, VParquetError>;

/// Errors that can occur while writing or reading a block
#[derive(Error, Debug)]
pub enum VParquetError {
    /// A trace was rejected on write; the writer stays usable
    #[error("Invalid trace: {0}")]
    InvalidTrace(String),

    /// A stored row could not be mapped back to a trace
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// The block was already completed
    #[error("Block is already sealed")]
    AlreadySealed,

    /// An earlier flush or write failed; the block can only be discarded
    #[error("Block writer failed: {0}")]
    WriterFailed(String),

    /// Backend or range reader failure
    #[error("I/O failure: {0}")]
    Io(#[source] StorageError),

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Malformed encoded input (codec stream, bloom shard, footer)
    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    /// A read-side failure tagged with the block and operation it came from
    #[error("Block {block_id}: {op} failed: {source}")]
    Block {
        block_id: Uuid,
        op: &'static str,
        #[source]
        source: Box<VParquetError>,
    },

    /// Error reading or writing the Parquet data object
    #[error("Parquet error: {0}")]
    Parquet(ParquetError),

    /// Error with Arrow data structures
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Missing required column
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    /// Block configuration rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl VParquetError {
    /// Tag the error with the block and operation it belongs to
    pub fn in_block(self, block_id: Uuid, op: &'static str) -> Self {
        match self {
            tagged @ VParquetError::Block { .. } => tagged,
            other => VParquetError::Block {
                block_id,
                op,
                source: Box::new(other),
            },
        }
    }

    /// The error without its block tag
    pub fn root(&self) -> &VParquetError {
        match self {
            VParquetError::Block { source, .. } => source.root(),
            other => other,
        }
    }

    /// True when the operation stopped because the caller cancelled it
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), VParquetError::Cancelled)
    }
}

impl From<StorageError> for VParquetError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Cancelled => VParquetError::Cancelled,
            other => VParquetError::Io(other),
        }
    }
}

impl From<ParquetError> for VParquetError {
    fn from(err: ParquetError) -> Self {
        // Range reader failures come back wrapped by the parquet reader
        match err {
            ParquetError::External(inner) => match inner.downcast::<StorageError>() {
                Ok(storage) => (*storage).into(),
                Err(other) => VParquetError::Parquet(ParquetError::External(other)),
            },
            other => VParquetError::Parquet(other),
        }
    }
}

impl From<CodecError> for VParquetError {
    fn from(err: CodecError) -> Self {
        VParquetError::DecodeFailure(err.to_string())
    }
}
