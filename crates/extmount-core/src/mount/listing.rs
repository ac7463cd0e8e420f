//! Mount entries as shown in the file browser.

use super::config::{MountConfig, ResolvedMount, relative_mount_point};
use crate::config::{ConfigError, StorageConfig};
use crate::crypto::PASSWORD_KEY;
use crate::storage::wrapper::permission;
use crate::storage::{basename, dirname};
use serde::Serialize;
use serde_json::Value;

/// Who configured a mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MountScopeKind {
    /// The user
    Personal,
    /// An administrator
    System,
}

/// One mount in the file-browser listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExternalMountEntry {
    /// Last path segment of the mount point
    pub name: String,
    /// Parent folder, empty at the top level
    pub path: String,
    /// Always `dir`
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Backend display name
    pub backend: String,
    /// Who configured it
    pub scope: MountScopeKind,
    /// Permission bits the user has on the mount itself
    pub permissions: u32,
    /// Stored id
    pub id: Option<u64>,
    /// Backend identifier as stored
    pub class: String,
    /// Configuration; system mounts carry no password
    pub config: StorageConfig,
}

impl ExternalMountEntry {
    fn new(config: &MountConfig, mount_point: &str, resolved: &ResolvedMount) -> Self {
        let relative = relative_mount_point(mount_point);
        let parent = dirname(&relative);
        let scope = if resolved.personal {
            MountScopeKind::Personal
        } else {
            MountScopeKind::System
        };
        let permissions = match scope {
            MountScopeKind::Personal => permission::READ | permission::DELETE,
            MountScopeKind::System => permission::READ,
        };
        let backend = config
            .registry()
            .get_backend(&resolved.class)
            .map_or_else(|| resolved.class.clone(), |b| b.text().to_string());

        let mut storage_config = StorageConfig::new(&relative, resolved.class.clone());
        storage_config.id = resolved.id;
        storage_config.backend_options = resolved.options.clone();
        storage_config.priority = resolved.priority;
        storage_config.auth_mechanism = resolved.auth_mechanism.clone();
        storage_config.mount_options = resolved.mount_options.clone();
        if scope == MountScopeKind::System
            && let Some(password) = storage_config.backend_options.get_mut(PASSWORD_KEY)
        {
            *password = Value::String(String::new());
        }

        Self {
            name: basename(&relative),
            path: if parent.is_empty() {
                String::new()
            } else {
                format!("/{parent}")
            },
            kind: "dir",
            backend,
            scope,
            permissions,
            id: resolved.id,
            class: resolved.class.clone(),
            config: storage_config,
        }
    }
}

/// Mounts visible to `user`, ordered by mount point.
pub fn list_external_mounts(
    config: &MountConfig,
    user: &str,
) -> Result<Vec<ExternalMountEntry>, ConfigError> {
    Ok(config
        .get_absolute_mount_points(user)?
        .iter()
        .map(|(mount_point, resolved)| ExternalMountEntry::new(config, mount_point, resolved))
        .collect())
}
