use crate::crypto::CredentialError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while validating, loading or persisting mount configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Mount point is the root, the reserved `Shared` folder, or empty
    #[error("Invalid mount point '{0}'")]
    InvalidMountPoint(String),

    /// No backend registered under this identifier
    #[error("Unknown backend '{0}'")]
    UnknownBackend(String),

    /// No authentication mechanism registered under this identifier
    #[error("Unknown authentication mechanism '{0}'")]
    UnknownAuthMechanism(String),

    /// The authentication mechanism's scheme is not accepted by the backend
    #[error("Backend '{backend}' does not accept authentication mechanism '{mechanism}'")]
    IncompatibleAuthMechanism {
        /// Backend identifier
        backend: String,
        /// Mechanism identifier
        mechanism: String,
    },

    /// Backend may not be used in personal mounts
    #[error("Backend '{0}' is not allowed for personal mounts")]
    BackendNotAllowed(String),

    /// A user tried to manage someone else's personal mounts
    #[error("User '{acting}' cannot manage personal mounts of '{target}'")]
    ForeignUser {
        /// User performing the change
        acting: String,
        /// User the change targets
        target: String,
    },

    /// Personal mounts are disabled system-wide
    #[error("Personal mounts are disabled")]
    UserMountingDisabled,

    /// A required backend option is missing or has the wrong type
    #[error("Invalid value for option '{parameter}' of backend '{backend}'")]
    InvalidOption {
        /// Backend identifier
        backend: String,
        /// Parameter name
        parameter: String,
    },

    /// No stored mount at this path
    #[error("Mount point '{0}' not found")]
    MountNotFound(String),

    /// Identifier or alias already taken in the registry
    #[error("Identifier '{0}' is already registered")]
    DuplicateIdentifier(String),

    /// System secret is empty
    #[error("System secret is not configured")]
    MissingSecret,

    /// Reading a configuration file failed
    #[error("Failed to read {path}: {source}")]
    Read {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Writing a configuration file failed
    #[error("Failed to write {path}: {source}")]
    Write {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// A configuration file has invalid content
    #[error("Failed to parse {path}: {message}")]
    Parse {
        /// File that failed
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Another process held the lock for too long
    #[error("Timed out waiting for lock on {0}")]
    LockTimeout(PathBuf),

    /// Stored credential could not be decrypted
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl ConfigError {
    /// Whether the error is a validation rejection (as opposed to an I/O failure)
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidMountPoint(_)
                | Self::UnknownBackend(_)
                | Self::UnknownAuthMechanism(_)
                | Self::IncompatibleAuthMechanism { .. }
                | Self::BackendNotAllowed(_)
                | Self::ForeignUser { .. }
                | Self::UserMountingDisabled
                | Self::InvalidOption { .. }
        )
    }
}
