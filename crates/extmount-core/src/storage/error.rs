//! Errors raised by the storage contract.
//!
//! Every backend reports failures through [`StorageError`]. The variants are
//! semantic categories rather than protocol codes, so the mount layer can
//! classify a failure (for example into a [`StorageStatus`](crate::StorageStatus))
//! without knowing which remote protocol produced it.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Numeric status codes carried by availability failures.
///
/// These travel with [`StorageError::NotAvailable`] so a failure wrapped by
/// [`FailedStorage`](crate::storage::FailedStorage) keeps the code of the
/// error that caused it.
pub mod code {
    /// Generic failure.
    pub const ERROR: i32 = 1;
    /// Not enough runtime context to answer (for example no session credentials).
    pub const INDETERMINATE: i32 = 2;
    /// Required configuration is missing or invalid.
    pub const INCOMPLETE_CONF: i32 = 3;
    /// The remote rejected the credentials.
    pub const UNAUTHORIZED: i32 = 4;
    /// The remote did not answer in time.
    pub const TIMEOUT: i32 = 5;
    /// Transport level failure talking to the remote.
    pub const NETWORK_ERROR: i32 = 6;
}

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// The storage could not be reached or constructed
    #[error("Storage is not available: {message}")]
    NotAvailable {
        /// Message of the underlying failure
        message: String,
        /// Status code of the underlying failure (see [`code`])
        code: i32,
    },

    /// Not enough runtime context to give a meaningful answer
    #[error("Insufficient data for meaningful answer: {0}")]
    InsufficientData(String),

    /// The path does not exist on the remote
    #[error("Path not found: {0}")]
    NotFound(String),

    /// The target path already exists
    #[error("Path already exists: {0}")]
    AlreadyExists(String),

    /// Directory still has entries
    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    /// Expected a directory
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file
    #[error("Is a directory: {0}")]
    IsADirectory(String),

    /// The operation is not permitted on this path or mount
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The backend cannot perform this operation
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Backend options are missing or malformed
    #[error("Invalid backend configuration: {0}")]
    InvalidConfig(String),

    /// The remote presented credentials that were rejected
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// The SSH host key differs from the pinned one
    #[error("Host public key does not match known key for {host}")]
    HostKeyMismatch {
        /// Host whose key changed
        host: String,
    },

    /// The remote answered with something we could not interpret
    #[error("Remote protocol error: {0}")]
    Protocol(String),

    /// The remote did not respond in time
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Local or transport I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Create an availability failure with an explicit code
    pub fn not_available(message: impl Into<String>, code: i32) -> Self {
        Self::NotAvailable {
            message: message.into(),
            code,
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Status code of this error
    pub fn code(&self) -> i32 {
        match self {
            Self::NotAvailable { code, .. } => *code,
            Self::InsufficientData(_) => code::INDETERMINATE,
            Self::InvalidConfig(_) => code::INCOMPLETE_CONF,
            Self::Unauthorized(_) | Self::HostKeyMismatch { .. } => code::UNAUTHORIZED,
            Self::Timeout(_) => code::TIMEOUT,
            Self::Io(_) | Self::Protocol(_) => code::NETWORK_ERROR,
            _ => code::ERROR,
        }
    }

    /// Whether the error means "cannot tell yet" rather than "broken"
    pub fn is_indeterminate(&self) -> bool {
        self.code() == code::INDETERMINATE
    }

    /// Whether the error is a missing-path condition
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Map an `io::Error` on a local path to the matching semantic variant
    pub fn from_io(err: io::Error, path: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_string()),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(path.to_string()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_string()),
            io::ErrorKind::DirectoryNotEmpty => Self::NotEmpty(path.to_string()),
            io::ErrorKind::NotADirectory => Self::NotADirectory(path.to_string()),
            io::ErrorKind::IsADirectory => Self::IsADirectory(path.to_string()),
            io::ErrorKind::TimedOut => Self::Timeout(Duration::ZERO),
            _ => Self::Io(err),
        }
    }

    /// Convert into an `io::Error`, for use inside `Read`/`Write` impls
    pub fn into_io(self) -> io::Error {
        match self {
            Self::Io(e) => e,
            Self::NotFound(p) => io::Error::new(io::ErrorKind::NotFound, p),
            Self::PermissionDenied(p) => io::Error::new(io::ErrorKind::PermissionDenied, p),
            Self::Timeout(_) => io::Error::new(io::ErrorKind::TimedOut, self.to_string()),
            other => io::Error::other(other.to_string()),
        }
    }
}

/// Result alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
