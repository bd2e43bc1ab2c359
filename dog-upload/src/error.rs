use std::sync::Arc;
use thiserror::Error;

/// Result type for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Shared, clonable error source
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Errors that can occur during a chunked upload.
///
/// Sources are held behind `Arc` so the session's error slot can hand out
/// copies of the terminal error without consuming it.
#[derive(Error, Debug, Clone)]
pub enum UploadError {
    #[error("Invalid upload options: {message}")]
    Invalid { message: String },

    #[error("Failed to read source stream: {source}")]
    Read {
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("Failed to stage block {block_id}: {source}")]
    Stage {
        block_id: String,
        #[source]
        source: SharedError,
    },

    #[error("Failed to commit block list: {source}")]
    Commit {
        #[source]
        source: SharedError,
    },

    #[error("Checksum mismatch for block {block_id}")]
    ChecksumMismatch { block_id: String },

    #[error("Upload exceeds the maximum of {max} blocks")]
    TooManyBlocks { max: u32 },

    #[error("Transfer manager is closed")]
    PoolClosed,

    #[error("Upload was canceled")]
    Canceled,

    #[error("Upload deadline exceeded")]
    DeadlineExceeded,

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: SharedError,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    /// Create an invalid options error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Arc::new(error),
        }
    }

    /// Wrap a writer failure for the given block
    pub fn stage<S: Into<String>>(block_id: S, error: UploadError) -> Self {
        Self::Stage {
            block_id: block_id.into(),
            source: Arc::new(error),
        }
    }

    /// Wrap a writer failure during commit
    pub fn commit(error: UploadError) -> Self {
        Self::Commit {
            source: Arc::new(error),
        }
    }

    /// Check if this error is a cancellation signal rather than a cause
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Canceled | Self::DeadlineExceeded)
    }

    /// The writer error wrapped by a stage or commit failure
    pub fn writer_error(&self) -> Option<&UploadError> {
        match self {
            Self::Stage { source, .. } | Self::Commit { source } => source.downcast_ref::<UploadError>(),
            _ => None,
        }
    }

    /// The I/O error kind, if this error came from reading the source
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            Self::Read { source } => Some(source.kind()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        Self::Read {
            source: Arc::new(err),
        }
    }
}
