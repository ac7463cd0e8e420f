//! Protocol backends for external storage mounts.
//!
//! Every backend implements [`extmount_core::Storage`] and describes itself
//! with a [`BackendDefinition`]. [`default_registry`] returns a registry with
//! all of them next to the local backend and the built-in auth mechanisms.
//!
//! # Backends
//!
//! | Identifier | Legacy alias | Protocol |
//! |------------|--------------|----------|
//! | `amazons3` | `\OC\Files\Storage\AmazonS3` | S3 REST with SigV4 signing |
//! | `swift` | `\OC\Files\Storage\Swift` | OpenStack Swift with Keystone auth |
//! | `dropbox` | `\OC\Files\Storage\Dropbox` | Dropbox API v2 |
//! | `googledrive` | `\OC\Files\Storage\Google` | Google Drive API v3 |
//! | `dav` | `\OC\Files\Storage\DAV` | WebDAV |
//! | `owncloud` | `\OC\Files\Storage\OwnCloud` | WebDAV of another ownCloud server |
//! | `ftp` | `\OC\Files\Storage\FTP` | FTP (passive mode) |
//! | `smb` | `\OC\Files\Storage\SMB` | `smbclient` |
//! | `irods` | `\OC\Files\Storage\iRODS` | iRODS icommands |
//! | `sftp` | `\OC\Files\Storage\SFTP` | SFTP with password login |
//! | `sftp_key` | `\OC\Files\Storage\SFTP_Key` | SFTP with RSA key login |
//!
//! # Emulated operations
//!
//! Protocols without random-access writes hand out a local temporary file
//! for writing and upload it when the stream is closed. Object stores mark
//! directories with zero-length `name/` keys. FTP, SMB, iRODS and SFTP share
//! the URL-based [`StreamWrapper`](extmount_core::storage::stream_wrapper::StreamWrapper)
//! and only supply primitive transports.
//!
//! # Dependencies
//!
//! SMB and iRODS need their client programs on `PATH`. SFTP needs the
//! `sftp` cargo feature (libssh2). Missing pieces are reported by
//! [`BackendDefinition::check_dependencies`] and hide the backend from
//! [`BackendRegistry::available_backends`].

pub mod amazons3;
pub mod dav;
pub mod deps;
pub mod dropbox;
pub mod ftp;
pub mod google;
pub mod http;
pub mod irods;
pub mod options;
pub mod process;
pub mod sftp;
pub mod smb;
pub mod swift;
pub mod xml;

use extmount_core::{BackendDefinition, BackendRegistry, ConfigError};

/// Definitions of every protocol backend in this crate
pub fn definitions() -> Vec<BackendDefinition> {
    vec![
        amazons3::definition(),
        swift::definition(),
        dropbox::definition(),
        google::definition(),
        dav::definition(),
        dav::owncloud_definition(),
        ftp::definition(),
        smb::definition(),
        irods::definition(),
        sftp::definition(),
        sftp::key_definition(),
    ]
}

/// Registry with the local backend, the built-in auth mechanisms and all
/// protocol backends
pub fn default_registry() -> Result<BackendRegistry, ConfigError> {
    let mut registry = BackendRegistry::with_builtin();
    for definition in definitions() {
        registry.register_backend(definition)?;
    }
    Ok(registry)
}
