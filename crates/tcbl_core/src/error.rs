//! Error types for TCBL core.

use tcbl_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type TcblResult<T> = Result<T, TcblError>;

/// Errors that can occur in TCBL core operations.
#[derive(Debug, Error)]
pub enum TcblError {
    /// An argument was rejected, e.g. a misaligned page offset.
    #[error("bad argument: {message}")]
    BadArgument {
        /// Description of the rejected argument.
        message: String,
    },

    /// Memory for a log entry or name buffer could not be reserved.
    #[error("allocation failure")]
    AllocFailure,

    /// A read extended past the logical end of the file.
    #[error("read past logical end: offset {offset}, len {len}, size {size}")]
    BoundsCheck {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The logical file size.
        size: u64,
    },

    /// The operation requires an active transaction.
    #[error("no transaction active")]
    NoTxnActive,

    /// The operation is not allowed while a transaction is active.
    #[error("transaction active")]
    TxnActive,

    /// Another handle committed first; the transaction was discarded.
    #[error("transaction conflict: log changed since snapshot")]
    ConflictAbort,

    /// A checkpoint discarded log history this handle's snapshot needs.
    #[error("snapshot expired by checkpoint")]
    SnapshotExpired,

    /// Persistent state is inconsistent, e.g. an interrupted checkpoint.
    #[error("internal error: {message}")]
    InternalError {
        /// Description of the inconsistency.
        message: String,
    },

    /// The named file does not exist.
    #[error("file not found: {name}")]
    FileNotFound {
        /// The name that was looked up.
        name: String,
    },

    /// File store error.
    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for TcblError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { name } => Self::FileNotFound { name },
            other => Self::Storage(other),
        }
    }
}

impl From<std::collections::TryReserveError> for TcblError {
    fn from(_: std::collections::TryReserveError) -> Self {
        Self::AllocFailure
    }
}

impl TcblError {
    /// Creates a bad argument error.
    pub fn bad_argument(message: impl Into<String>) -> Self {
        Self::BadArgument {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Returns true if the caller may re-begin and retry the transaction.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConflictAbort | Self::SnapshotExpired)
    }
}
