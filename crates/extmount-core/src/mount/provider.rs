//! Turns a user's resolved mount table into live storages.
//!
//! Construction failures never abort the listing: the affected mount gets a
//! [`FailedStorage`] that reports the failure when it is used.

use super::config::{MountConfig, ResolvedMount, relative_mount_point};
use crate::config::ConfigError;
use crate::definition::auth::AuthBehavior;
use crate::definition::SessionCredentials;
use crate::definition::capability::dependency_message;
use crate::storage::error::code;
use crate::storage::wrapper::{PermissionsMask, SessionStorageWrapper};
use crate::storage::{FailedStorage, Storage, StorageError, StorageResult};
use std::sync::Arc;
use tracing::{debug, warn};

/// A live system mount.
#[derive(Clone)]
pub struct ExternalMount {
    mount_point: String,
    storage: Arc<dyn Storage>,
    resolved: ResolvedMount,
    failure: Option<(String, i32)>,
}

impl std::fmt::Debug for ExternalMount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalMount")
            .field("mount_point", &self.mount_point)
            .field("class", &self.resolved.class)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

impl ExternalMount {
    /// Absolute mount point, `/<uid>/files/...`
    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }

    /// Storage behind the mount, wrapped as configured
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Resolved configuration
    pub fn resolved(&self) -> &ResolvedMount {
        &self.resolved
    }

    /// Message and code of the construction failure, if any
    pub fn failure(&self) -> Option<(&str, i32)> {
        self.failure.as_ref().map(|(m, c)| (m.as_str(), *c))
    }
}

/// A live personal mount its owner may move or remove.
#[derive(Debug, Clone)]
pub struct PersonalMount {
    mount: ExternalMount,
    user: String,
    config: Arc<MountConfig>,
}

impl PersonalMount {
    /// Owner
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Move to another absolute or relative mount point
    pub fn move_mount(&mut self, target: &str) -> Result<(), ConfigError> {
        let from = relative_mount_point(&self.mount.mount_point);
        let to = if target.starts_with(&format!("/{}/files", self.user)) {
            relative_mount_point(target)
        } else {
            target.to_string()
        };
        self.config.move_personal_mount(&self.user, &from, &to)?;
        self.mount.mount_point = format!(
            "/{}/files/{}",
            self.user,
            crate::storage::normalize_path(&to)
        );
        Ok(())
    }

    /// Delete the mount from the owner's table
    pub fn remove_mount(self) -> Result<(), ConfigError> {
        let relative = relative_mount_point(&self.mount.mount_point);
        self.config
            .remove_mount_point(&relative, &super::config::MountScope::personal(&self.user))
    }
}

impl std::ops::Deref for PersonalMount {
    type Target = ExternalMount;

    fn deref(&self) -> &ExternalMount {
        &self.mount
    }
}

/// A resolved mount.
#[derive(Debug, Clone)]
pub enum Mount {
    /// Configured by an administrator
    System(ExternalMount),
    /// Configured by the user
    Personal(PersonalMount),
}

impl Mount {
    /// Underlying mount
    pub fn external(&self) -> &ExternalMount {
        match self {
            Self::System(mount) => mount,
            Self::Personal(mount) => &mount.mount,
        }
    }

    /// Absolute mount point
    pub fn mount_point(&self) -> &str {
        self.external().mount_point()
    }

    /// Storage behind the mount
    pub fn storage(&self) -> &Arc<dyn Storage> {
        self.external().storage()
    }

    /// Whether it is a personal mount
    pub fn is_personal(&self) -> bool {
        matches!(self, Self::Personal(_))
    }
}

/// Builds live mounts for a user.
#[derive(Debug, Clone)]
pub struct MountProvider {
    config: Arc<MountConfig>,
}

impl MountProvider {
    /// Provider over `config`
    pub fn new(config: Arc<MountConfig>) -> Self {
        Self { config }
    }

    /// Configuration store
    pub fn config(&self) -> &Arc<MountConfig> {
        &self.config
    }

    /// All mounts of `user`, ordered by mount point
    pub fn get_mounts_for_user(
        &self,
        user: &str,
        session: Option<&SessionCredentials>,
    ) -> Result<Vec<Mount>, ConfigError> {
        let resolved = self.config.get_absolute_mount_points(user)?;
        Ok(resolved
            .into_iter()
            .map(|(mount_point, resolved)| self.mount(user, mount_point, resolved, session))
            .collect())
    }

    /// The mount whose mount point contains `path`, longest match first
    pub fn find_mount(
        &self,
        user: &str,
        path: &str,
        session: Option<&SessionCredentials>,
    ) -> Result<Option<(Mount, String)>, ConfigError> {
        let relative = crate::storage::normalize_path(path);
        let mut best: Option<(Mount, String)> = None;
        for mount in self.get_mounts_for_user(user, session)? {
            let mount_rel = crate::storage::normalize_path(&relative_mount_point(mount.mount_point()));
            let inner = if relative == mount_rel {
                Some(String::new())
            } else {
                relative
                    .strip_prefix(&format!("{mount_rel}/"))
                    .map(ToString::to_string)
            };
            let Some(inner) = inner else { continue };
            let longer = best.as_ref().is_none_or(|(b, _)| {
                mount.mount_point().len() > b.mount_point().len()
            });
            if longer {
                best = Some((mount, inner));
            }
        }
        Ok(best)
    }

    fn mount(
        &self,
        user: &str,
        mount_point: String,
        resolved: ResolvedMount,
        session: Option<&SessionCredentials>,
    ) -> Mount {
        let (storage, failure) = match self.construct(user, &resolved, session) {
            Ok(storage) => (self.wrap(storage, &resolved), None),
            Err(e) => {
                warn!(
                    app = "files_external",
                    mount_point = %mount_point,
                    backend = %resolved.class,
                    error = %e,
                    "Mount is not available"
                );
                let failed = FailedStorage::new(&e);
                let failure = (failed.message().to_string(), failed.code());
                (Arc::new(failed) as Arc<dyn Storage>, Some(failure))
            }
        };
        let personal = resolved.personal;
        let mount = ExternalMount {
            mount_point,
            storage,
            resolved,
            failure,
        };
        if personal {
            Mount::Personal(PersonalMount {
                mount,
                user: user.to_string(),
                config: Arc::clone(&self.config),
            })
        } else {
            Mount::System(mount)
        }
    }

    fn construct(
        &self,
        user: &str,
        resolved: &ResolvedMount,
        session: Option<&SessionCredentials>,
    ) -> StorageResult<Arc<dyn Storage>> {
        let registry = self.config.registry();
        let backend = registry.get_backend(&resolved.class).ok_or_else(|| {
            StorageError::not_available(format!("Unknown backend '{}'", resolved.class), code::ERROR)
        })?;

        let missing = backend.check_dependencies();
        if let Some(first) = missing.first() {
            return Err(StorageError::not_available(
                dependency_message(&first.dependency, &[backend.text()]),
                code::ERROR,
            ));
        }

        let mechanism = registry
            .resolve_auth_mechanism(backend, resolved.auth_mechanism.as_deref())
            .map_err(|e| StorageError::InvalidConfig(e.to_string()))?;
        let mut options = resolved.options.clone();
        mechanism.manipulate(&mut options, session)?;
        backend
            .validate_options(&options)
            .map_err(|p| StorageError::InvalidConfig(format!("invalid value for '{p}'")))?;

        debug!(backend = backend.id(), user, "Constructing storage");
        backend.instantiate(&options, &self.config.context(Some(user)))
    }

    fn wrap(&self, storage: Arc<dyn Storage>, resolved: &ResolvedMount) -> Arc<dyn Storage> {
        let session_scoped = resolved
            .auth_mechanism
            .as_deref()
            .and_then(|id| self.config.registry().get_auth_mechanism(id))
            .is_some_and(|m| m.behavior() == AuthBehavior::SessionCredentials);

        let storage = if resolved.mount_options.read_only() {
            Arc::new(PermissionsMask::read_only(storage)) as Arc<dyn Storage>
        } else {
            storage
        };
        if session_scoped {
            Arc::new(SessionStorageWrapper::new(storage))
        } else {
            storage
        }
    }
}
