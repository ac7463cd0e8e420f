//! Mount configuration and the storage contract for external storage mounts.
//!
//! This crate holds everything about external mounts except the protocol
//! backends themselves, which live in `extmount-backends`.
//!
//! # Components
//!
//! - [`Storage`] - uniform filesystem contract every backend implements
//! - [`MountConfig`] - stores mounts per scope and resolves a user's mount table
//! - [`MountProvider`] - turns resolved mounts into live, wrapped storages
//! - [`BackendRegistry`] - backend and auth mechanism catalog
//! - [`CredentialCipher`] - encrypts stored passwords
//! - [`EtagPropagator`] - defers etag updates for group and global mounts
//!
//! # Resolution
//!
//! For a user, mounts are merged in this order, later entries replacing
//! earlier ones at the same mount point:
//! 1. Mounts for everyone
//! 2. Mounts for each group the user is in
//! 3. Mounts naming the user
//! 4. The user's personal mounts
//!
//! `$user` in mount points and string options is replaced by the user id
//! before stored passwords are decrypted.
//!
//! ## Failed backends
//!
//! A mount whose backend cannot be constructed still appears in the table.
//! Its storage is a [`FailedStorage`] that returns the construction error
//! from every operation, so the failure shows up where the mount is used.

pub mod config;
pub mod crypto;
pub mod definition;
pub mod etag;
pub mod mount;
pub mod registry;
pub mod storage;

// Re-export commonly used types at crate root
pub use config::{
    BackendOptions, ConfigError, MountOptions, StorageConfig, StorageStatus, SystemConfig,
    UserDirectory,
};
pub use crypto::{CredentialCipher, CredentialError, StoredCredential};
pub use definition::{
    AuthMechanism, BackendDefinition, DefinitionParameter, SessionCredentials, StorageContext,
};
pub use etag::{ChangePropagator, EtagPropagator, PreferenceStore};
pub use mount::{
    ConnectivityTester, Mount, MountConfig, MountProvider, MountScope, MountType, NewMount,
};
pub use registry::BackendRegistry;
pub use storage::{FailedStorage, FileStream, FileType, OpenMode, Storage, StorageError, StorageResult};
