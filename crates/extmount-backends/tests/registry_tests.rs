//! Every protocol backend is registered and wired to its auth mechanisms.

use extmount_backends::{default_registry, definitions};
use extmount_core::definition::auth::mechanism;

const BACKENDS: &[(&str, &str)] = &[
    ("amazons3", "\\OC\\Files\\Storage\\AmazonS3"),
    ("swift", "\\OC\\Files\\Storage\\Swift"),
    ("dropbox", "\\OC\\Files\\Storage\\Dropbox"),
    ("googledrive", "\\OC\\Files\\Storage\\Google"),
    ("dav", "\\OC\\Files\\Storage\\DAV"),
    ("owncloud", "\\OC\\Files\\Storage\\OwnCloud"),
    ("ftp", "\\OC\\Files\\Storage\\FTP"),
    ("smb", "\\OC\\Files\\Storage\\SMB"),
    ("irods", "\\OC\\Files\\Storage\\iRODS"),
    ("sftp", "\\OC\\Files\\Storage\\SFTP"),
    ("sftp_key", "\\OC\\Files\\Storage\\SFTP_Key"),
    ("local", "\\OC\\Files\\Storage\\Local"),
];

#[test]
fn test_all_backends_registered_under_id_and_alias() {
    let registry = default_registry().unwrap();
    assert_eq!(registry.backends().len(), definitions().len() + 1);
    for (id, alias) in BACKENDS {
        let by_id = registry.get_backend(id).unwrap_or_else(|| panic!("{id} not registered"));
        assert_eq!(by_id.id(), *id);
        let by_alias = registry
            .get_backend(alias)
            .unwrap_or_else(|| panic!("{alias} not registered"));
        assert_eq!(by_alias.id(), *id);
    }
}

#[test]
fn test_legacy_mechanisms_resolve() {
    let registry = default_registry().unwrap();
    for backend in registry.backends() {
        let resolved = registry
            .resolve_auth_mechanism(backend, None)
            .unwrap_or_else(|e| panic!("{}: {e}", backend.id()));
        assert_eq!(resolved.id(), backend.legacy_auth_mechanism());
    }
}

#[test]
fn test_sftp_key_needs_public_key_auth() {
    let registry = default_registry().unwrap();
    let sftp_key = registry.get_backend("sftp_key").unwrap();
    assert_eq!(sftp_key.legacy_auth_mechanism(), mechanism::RSA);
    assert!(registry.resolve_auth_mechanism(sftp_key, Some(mechanism::PASSWORD)).is_err());

    let sftp = registry.get_backend("sftp").unwrap();
    assert!(registry.resolve_auth_mechanism(sftp, Some(mechanism::RSA)).is_ok());
}

#[test]
fn test_registering_twice_is_rejected() {
    let mut registry = default_registry().unwrap();
    let again = definitions().into_iter().next().unwrap();
    assert!(registry.register_backend(again).is_err());
}
